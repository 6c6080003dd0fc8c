//! Engine selection and process launch.
//!
//! Each [`EngineKind`] variant has exactly one [`EngineLauncher`]; the launcher is picked once at
//! acquire time and yields a DevTools websocket URL plus the owned child process, if any.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child as ChromiumChild;
use chromiumoxide::browser::BrowserConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::{Child as NativeChild, Command};
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{debug, info, warn};
use uuid::Uuid;
use which::which;

use crate::config::CdpConfig;
use crate::util::extract_ws_url;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Chromium => "chromium",
            EngineKind::Firefox => "firefox",
            EngineKind::Webkit => "webkit",
        }
    }

    pub fn launcher(self) -> Box<dyn EngineLauncher> {
        match self {
            EngineKind::Chromium => Box::new(ChromiumLauncher),
            EngineKind::Firefox => Box::new(FirefoxLauncher),
            EngineKind::Webkit => Box::new(WebkitLauncher),
        }
    }

    /// Environment variable holding an explicit executable path for this engine.
    pub fn executable_env(&self) -> &'static str {
        match self {
            EngineKind::Chromium => "A11YSCOPE_CHROME",
            EngineKind::Firefox => "A11YSCOPE_FIREFOX",
            EngineKind::Webkit => "A11YSCOPE_WEBKIT",
        }
    }

    fn remediation(&self, kind: LaunchErrorKind) -> Option<String> {
        let text = match (self, kind) {
            (_, LaunchErrorKind::StartFailed) => return None,
            (EngineKind::Firefox, LaunchErrorKind::Unsupported) => {
                "This Firefox has no CDP remote agent. Point A11YSCOPE_FIREFOX at Firefox ESR 140 or older, attach with --ws-url, or use --engine chromium."
            }
            (EngineKind::Chromium, _) => {
                "Install Chrome or Chromium, or set A11YSCOPE_CHROME to the full path of the executable."
            }
            (EngineKind::Firefox, _) => {
                "Install Firefox ESR 140 or older (newer releases dropped CDP), or set A11YSCOPE_FIREFOX to the executable."
            }
            (EngineKind::Webkit, _) => {
                "WebKit exposes no DevTools endpoint of its own; pass --ws-url pointing at a running endpoint or use --engine chromium."
            }
        };
        Some(text.to_string())
    }

    /// Resolve the engine executable: explicit env override, then `PATH`, then well-known
    /// install locations (skipped when `A11YSCOPE_SKIP_OS_PATHS` is set).
    pub fn detect_executable(&self) -> Option<PathBuf> {
        if let Ok(raw) = env::var(self.executable_env()) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                let candidate = PathBuf::from(trimmed);
                if candidate.exists() {
                    return Some(candidate);
                }
            }
        }

        for name in self.executable_names() {
            if let Ok(path) = which(name) {
                return Some(path);
            }
        }

        let skip_defaults = env::var("A11YSCOPE_SKIP_OS_PATHS")
            .map(|value| !value.trim().is_empty())
            .unwrap_or(false);

        if !skip_defaults {
            for candidate in self.os_specific_paths() {
                if candidate.exists() {
                    return Some(candidate);
                }
            }
        }

        None
    }

    fn executable_names(&self) -> &'static [&'static str] {
        match self {
            EngineKind::Chromium => {
                if cfg!(target_os = "windows") {
                    &["chrome.exe", "chromium.exe", "msedge.exe"]
                } else {
                    &[
                        "google-chrome-stable",
                        "google-chrome",
                        "chromium",
                        "chromium-browser",
                    ]
                }
            }
            EngineKind::Firefox => {
                if cfg!(target_os = "windows") {
                    &["firefox.exe"]
                } else {
                    &["firefox", "firefox-esr"]
                }
            }
            EngineKind::Webkit => &[],
        }
    }

    fn os_specific_paths(&self) -> Vec<PathBuf> {
        match self {
            EngineKind::Chromium => chromium_os_paths(),
            EngineKind::Firefox => firefox_os_paths(),
            EngineKind::Webkit => Vec::new(),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(EngineKind::Chromium),
            "firefox" => Ok(EngineKind::Firefox),
            "webkit" => Ok(EngineKind::Webkit),
            other => Err(format!("unknown browser engine '{other}'")),
        }
    }
}

fn chromium_os_paths() -> Vec<PathBuf> {
    if cfg!(target_os = "windows") {
        let mut paths = Vec::new();
        for root in windows_search_roots() {
            paths.push(root.join("Google/Chrome/Application/chrome.exe"));
            paths.push(root.join("Chromium/Application/chrome.exe"));
            paths.push(root.join("Microsoft/Edge/Application/msedge.exe"));
        }
        paths
    } else if cfg!(target_os = "macos") {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    } else {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
        ]
    }
}

fn firefox_os_paths() -> Vec<PathBuf> {
    if cfg!(target_os = "windows") {
        windows_search_roots()
            .into_iter()
            .map(|root| root.join("Mozilla Firefox/firefox.exe"))
            .collect()
    } else if cfg!(target_os = "macos") {
        vec![PathBuf::from("/Applications/Firefox.app/Contents/MacOS/firefox")]
    } else {
        vec![
            PathBuf::from("/usr/bin/firefox"),
            PathBuf::from("/usr/lib/firefox/firefox"),
            PathBuf::from("/usr/lib/firefox-esr/firefox-esr"),
        ]
    }
}

fn windows_search_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    for key in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
        if let Ok(value) = env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                roots.push(PathBuf::from(trimmed));
            }
        }
    }
    roots
}

// ---------------------------------------------------------------------------
// Launch errors
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchErrorKind {
    /// The engine binary is not installed or could not be located.
    EngineMissing,
    /// The engine exists but does not offer a usable DevTools endpoint.
    Unsupported,
    StartFailed,
}

/// Acquisition failure. Never retried by the adapter.
#[derive(Clone, Debug, Error, Serialize, Deserialize)]
#[error("failed to launch {engine}: {reason}")]
pub struct LaunchError {
    pub engine: EngineKind,
    pub kind: LaunchErrorKind,
    pub reason: String,
    pub remediation: Option<String>,
}

/// Substrings (lowercase) that identify a missing engine in launcher/OS error text.
const MISSING_ENGINE_MARKERS: &[&str] = &[
    "executable not found",
    "not found at",
    "no such file",
    "could not auto detect",
    "executable doesn't exist",
    "enoent",
    "cannot find the file",
];

impl LaunchError {
    pub fn new(engine: EngineKind, kind: LaunchErrorKind, reason: impl Into<String>) -> Self {
        Self {
            engine,
            kind,
            reason: reason.into(),
            remediation: engine.remediation(kind),
        }
    }

    /// Classify a raw failure message, attaching install guidance when it reads like a missing
    /// engine.
    pub fn classify(engine: EngineKind, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let lower = reason.to_ascii_lowercase();
        let kind = if MISSING_ENGINE_MARKERS
            .iter()
            .any(|marker| lower.contains(marker))
        {
            LaunchErrorKind::EngineMissing
        } else {
            LaunchErrorKind::StartFailed
        };
        let mut err = Self::new(engine, kind, reason);
        if kind == LaunchErrorKind::StartFailed && lower.contains("sandbox") {
            err.remediation = Some(
                "The engine refused to start its sandbox; set A11YSCOPE_DISABLE_SANDBOX=1 when running in a container."
                    .to_string(),
            );
        }
        err
    }

    pub fn is_engine_missing(&self) -> bool {
        self.kind == LaunchErrorKind::EngineMissing
    }
}

// ---------------------------------------------------------------------------
// Launchers
// ---------------------------------------------------------------------------

/// Owned engine process.
pub enum BrowserProcess {
    Chromium(ChromiumChild),
    Native {
        child: NativeChild,
        scratch_dir: Option<PathBuf>,
    },
}

impl BrowserProcess {
    pub async fn kill(&mut self) -> Result<(), String> {
        match self {
            BrowserProcess::Chromium(child) => child.kill().await.map_err(|err| err.to_string()),
            BrowserProcess::Native { child, scratch_dir } => {
                let result = child.kill().await.map_err(|err| err.to_string());
                if let Some(dir) = scratch_dir.take() {
                    if let Err(err) = tokio::fs::remove_dir_all(&dir).await {
                        debug!(target: "cdp-adapter", ?err, dir = %dir.display(), "scratch profile cleanup failed");
                    }
                }
                result
            }
        }
    }
}

impl fmt::Debug for BrowserProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrowserProcess::Chromium(_) => f.write_str("BrowserProcess::Chromium"),
            BrowserProcess::Native { scratch_dir, .. } => f
                .debug_struct("BrowserProcess::Native")
                .field("scratch_dir", scratch_dir)
                .finish(),
        }
    }
}

/// Result of a successful launch: where to connect, and what to kill afterwards.
#[derive(Debug)]
pub struct LaunchedBrowser {
    pub engine: EngineKind,
    pub ws_url: String,
    pub process: Option<BrowserProcess>,
}

impl LaunchedBrowser {
    fn attached(engine: EngineKind, ws_url: &str) -> Self {
        info!(target: "cdp-adapter", %engine, url = ws_url, "attaching to running endpoint");
        Self {
            engine,
            ws_url: ws_url.to_string(),
            process: None,
        }
    }
}

#[async_trait]
pub trait EngineLauncher: Send + Sync {
    fn engine(&self) -> EngineKind;
    async fn launch(&self, cfg: &CdpConfig) -> Result<LaunchedBrowser, LaunchError>;
}

fn resolve_executable(engine: EngineKind, cfg: &CdpConfig) -> Result<PathBuf, LaunchError> {
    if let Some(explicit) = cfg.executable.as_ref().filter(|p| !p.as_os_str().is_empty()) {
        if explicit.exists() {
            return Ok(explicit.clone());
        }
        return Err(LaunchError::new(
            engine,
            LaunchErrorKind::EngineMissing,
            format!("{engine} executable not found at {}", explicit.display()),
        ));
    }
    engine.detect_executable().ok_or_else(|| {
        LaunchError::new(
            engine,
            LaunchErrorKind::EngineMissing,
            format!("{engine} executable not found on PATH or in default install locations"),
        )
    })
}

pub struct ChromiumLauncher;

impl ChromiumLauncher {
    fn browser_config(cfg: &CdpConfig, executable: &Path) -> Result<BrowserConfig, LaunchError> {
        let mut builder = BrowserConfig::builder()
            .request_timeout(Duration::from_millis(cfg.default_deadline_ms))
            .launch_timeout(Duration::from_millis(cfg.launch_timeout_ms))
            .chrome_executable(executable.to_path_buf());

        if !cfg.headless {
            builder = builder.with_head();
        }
        if cfg.no_sandbox {
            builder = builder.no_sandbox();
        }

        let mut args: Vec<String> = [
            "--disable-background-networking",
            "--disable-background-timer-throttling",
            "--disable-breakpad",
            "--disable-component-update",
            "--disable-default-apps",
            "--disable-dev-shm-usage",
            "--disable-extensions",
            "--disable-popup-blocking",
            "--disable-sync",
            "--metrics-recording-only",
            "--no-first-run",
            "--no-default-browser-check",
            "--password-store=basic",
            "--remote-allow-origins=*",
            "--use-mock-keychain",
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect();
        if cfg.headless {
            args.push("--headless=new".into());
            args.push("--hide-scrollbars".into());
            args.push("--mute-audio".into());
        }
        args.extend(cfg.extra_args.iter().cloned());
        builder = builder.args(args);

        if let Some(dir) = &cfg.user_data_dir {
            builder = builder.user_data_dir(dir.clone());
        }

        builder.build().map_err(|err| {
            LaunchError::new(
                EngineKind::Chromium,
                LaunchErrorKind::StartFailed,
                format!("browser config error: {err}"),
            )
        })
    }
}

#[async_trait]
impl EngineLauncher for ChromiumLauncher {
    fn engine(&self) -> EngineKind {
        EngineKind::Chromium
    }

    async fn launch(&self, cfg: &CdpConfig) -> Result<LaunchedBrowser, LaunchError> {
        let engine = self.engine();
        if let Some(url) = &cfg.websocket_url {
            return Ok(LaunchedBrowser::attached(engine, url));
        }

        let executable = resolve_executable(engine, cfg)?;
        let config = Self::browser_config(cfg, &executable)?;
        let mut child = config.launch().map_err(|err| {
            LaunchError::classify(engine, format!("failed to launch chromium: {err}"))
        })?;

        let stderr = child.stderr.take().ok_or_else(|| {
            LaunchError::new(
                engine,
                LaunchErrorKind::StartFailed,
                "chromium process missing stderr handle",
            )
        })?;
        let deadline = Duration::from_millis(cfg.launch_timeout_ms);
        match extract_ws_url(stderr, deadline).await {
            Ok(ws_url) => {
                info!(target: "cdp-adapter", %engine, executable = %executable.display(), "engine launched");
                Ok(LaunchedBrowser {
                    engine,
                    ws_url,
                    process: Some(BrowserProcess::Chromium(child)),
                })
            }
            Err(err) => {
                if let Err(kill_err) = child.kill().await {
                    warn!(target: "cdp-adapter", ?kill_err, "failed to kill chromium after launch failure");
                }
                Err(LaunchError::classify(engine, err.to_string()))
            }
        }
    }
}

/// Newest Firefox major release whose remote agent still speaks CDP.
pub const FIREFOX_LAST_CDP_MAJOR: u32 = 140;

/// Major version from `firefox --version` output such as `Mozilla Firefox 128.5.0esr`.
pub fn firefox_major_version(output: &str) -> Option<u32> {
    let (_, rest) = output.split_once("Firefox")?;
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

pub struct FirefoxLauncher;

impl FirefoxLauncher {
    /// `None` when the executable cannot report a version; launch is attempted anyway.
    async fn major_version(executable: &Path) -> Option<u32> {
        let probe = Command::new(executable)
            .arg("--version")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = match tokio::time::timeout(Duration::from_secs(10), probe).await {
            Ok(Ok(output)) if output.status.success() => output,
            Ok(Ok(output)) => {
                debug!(target: "cdp-adapter", status = %output.status, "firefox --version failed");
                return None;
            }
            Ok(Err(err)) => {
                debug!(target: "cdp-adapter", %err, "could not run firefox --version");
                return None;
            }
            Err(_) => return None,
        };
        firefox_major_version(&String::from_utf8_lossy(&output.stdout))
    }

    const USER_PREFS: &'static str = concat!(
        "user_pref(\"remote.active-protocols\", 3);\n",
        "user_pref(\"browser.shell.checkDefaultBrowser\", false);\n",
        "user_pref(\"datareporting.policy.dataSubmissionEnabled\", false);\n",
        "user_pref(\"browser.startup.homepage_override.mstone\", \"ignore\");\n",
    );

    async fn prepare_profile(cfg: &CdpConfig) -> Result<(PathBuf, bool), std::io::Error> {
        let (dir, scratch) = match &cfg.user_data_dir {
            Some(dir) => (dir.clone(), false),
            None => (
                env::temp_dir().join(format!("a11yscope-firefox-{}", Uuid::new_v4())),
                true,
            ),
        };
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join("user.js"), Self::USER_PREFS).await?;
        Ok((dir, scratch))
    }
}

#[async_trait]
impl EngineLauncher for FirefoxLauncher {
    fn engine(&self) -> EngineKind {
        EngineKind::Firefox
    }

    async fn launch(&self, cfg: &CdpConfig) -> Result<LaunchedBrowser, LaunchError> {
        let engine = self.engine();
        if let Some(url) = &cfg.websocket_url {
            return Ok(LaunchedBrowser::attached(engine, url));
        }

        let executable = resolve_executable(engine, cfg)?;
        match Self::major_version(&executable).await {
            Some(major) if major > FIREFOX_LAST_CDP_MAJOR => {
                return Err(LaunchError::new(
                    engine,
                    LaunchErrorKind::Unsupported,
                    format!(
                        "Firefox {major} dropped CDP; the last release with it is {FIREFOX_LAST_CDP_MAJOR}"
                    ),
                ));
            }
            Some(major) => debug!(target: "cdp-adapter", major, "firefox version accepted"),
            None => warn!(target: "cdp-adapter", executable = %executable.display(), "firefox version unknown; trying CDP anyway"),
        }
        let (profile, scratch) = Self::prepare_profile(cfg).await.map_err(|err| {
            LaunchError::new(
                engine,
                LaunchErrorKind::StartFailed,
                format!("failed to prepare firefox profile: {err}"),
            )
        })?;

        let mut command = Command::new(&executable);
        command
            .arg("--remote-debugging-port=0")
            .arg("--no-remote")
            .arg("--profile")
            .arg(&profile);
        if cfg.headless {
            command.arg("--headless");
        }
        command
            .args(&cfg.extra_args)
            .arg("about:blank")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|err| {
            LaunchError::classify(engine, format!("failed to spawn firefox: {err}"))
        })?;
        let scratch_dir = scratch.then_some(profile);

        let Some(stderr) = child.stderr.take() else {
            return Err(LaunchError::new(
                engine,
                LaunchErrorKind::StartFailed,
                "firefox process missing stderr handle",
            ));
        };

        let deadline = Duration::from_millis(cfg.launch_timeout_ms);
        let mut process = BrowserProcess::Native { child, scratch_dir };
        match extract_ws_url(stderr.compat(), deadline).await {
            Ok(ws_url) => {
                info!(target: "cdp-adapter", %engine, executable = %executable.display(), "engine launched");
                Ok(LaunchedBrowser {
                    engine,
                    ws_url,
                    process: Some(process),
                })
            }
            Err(err) => {
                if let Err(kill_err) = process.kill().await {
                    warn!(target: "cdp-adapter", %kill_err, "failed to kill firefox after launch failure");
                }
                // running but silent: the remote agent offers no CDP endpoint
                if err.to_string().starts_with("timed out") {
                    return Err(LaunchError::new(
                        engine,
                        LaunchErrorKind::Unsupported,
                        format!("firefox never announced a CDP endpoint: {err}"),
                    ));
                }
                Err(LaunchError::classify(engine, err.to_string()))
            }
        }
    }
}

pub struct WebkitLauncher;

#[async_trait]
impl EngineLauncher for WebkitLauncher {
    fn engine(&self) -> EngineKind {
        EngineKind::Webkit
    }

    async fn launch(&self, cfg: &CdpConfig) -> Result<LaunchedBrowser, LaunchError> {
        let engine = self.engine();
        match &cfg.websocket_url {
            Some(url) => Ok(LaunchedBrowser::attached(engine, url)),
            None => Err(LaunchError::new(
                engine,
                LaunchErrorKind::EngineMissing,
                "no DevTools-protocol webkit executable is available to spawn",
            )),
        }
    }
}
