use anyhow::{anyhow, Result};
use futures::io::{AsyncBufReadExt, AsyncRead, BufReader};
use futures::stream::StreamExt;
use tokio::time::{timeout, Duration};

/// Lines kept for the failure preview.
const STDERR_PREVIEW_LINES: usize = 8;

/// Read an engine's stderr until it announces its DevTools websocket URL.
///
/// Both Chromium and Firefox print `DevTools listening on ws://.../devtools/browser/<id>`.
pub async fn extract_ws_url<R>(stderr: R, deadline: Duration) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    let mut captured = Vec::new();

    let reader = async {
        while let Some(line) = lines.next().await {
            let line = line?;
            if let Some(ws) = parse_listening_line(&line) {
                return Ok(ws);
            }
            captured.push(line);
        }
        Err(anyhow!(
            "engine exited before exposing devtools websocket url. stderr preview: {}",
            captured
                .iter()
                .take(STDERR_PREVIEW_LINES)
                .cloned()
                .collect::<Vec<_>>()
                .join(" | ")
        ))
    };

    timeout(deadline, reader).await.map_err(|_| {
        anyhow!(
            "timed out after {}ms waiting for devtools websocket url",
            deadline.as_millis()
        )
    })?
}

fn parse_listening_line(line: &str) -> Option<String> {
    let (_, ws) = line.rsplit_once("listening on ")?;
    let ws = ws.trim();
    (ws.starts_with("ws") && ws.contains("devtools/browser")).then(|| ws.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;

    #[tokio::test]
    async fn finds_url_after_noise() {
        let output = b"[0101/000000.000:WARNING] something\nDevTools listening on ws://127.0.0.1:41235/devtools/browser/1f2e\n";
        let url = extract_ws_url(Cursor::new(&output[..]), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(url, "ws://127.0.0.1:41235/devtools/browser/1f2e");
    }

    #[tokio::test]
    async fn early_exit_reports_stderr_preview() {
        let output = b"error while loading shared libraries: libnss3.so\n";
        let err = extract_ws_url(Cursor::new(&output[..]), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("libnss3.so"));
    }

    #[test]
    fn ignores_bidi_only_endpoints() {
        assert!(parse_listening_line("WebDriver BiDi listening on ws://127.0.0.1:9222").is_none());
    }
}
