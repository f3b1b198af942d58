//! Browser session management
//!
//! Launches one Chrome/Chromium instance behind a private chromedriver
//! process. Launch flags strip the usual automation markers, and every
//! navigation is preceded by a randomized throttling delay.

use std::path::Path;
use std::time::Duration;

use rand::Rng;
use thirtyfour::error::WebDriverError;
use thirtyfour::{ChromeCapabilities, ChromiumLikeCapabilities, DesiredCapabilities, WebDriver};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::agent::resolve_user_agent;
use super::driver::DriverProcess;
use super::errors::BrowserError;

/// First stop of the cookie warm-up pass.
const WARM_UP_URL: &str = "https://google.com";
/// Follow-up search so the session carries more than a bare landing-page cookie.
const WARM_UP_SEARCH_URL: &str = "https://google.com/search?q=cookies";

/// Configuration for a browser session
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Path to the chromedriver binary
    pub driver_path: String,
    /// Run in headless mode
    pub headless: bool,
    /// User agent to present; synthesized from the host platform when None
    pub user_agent: Option<String>,
    /// Window width in pixels
    pub window_width: u32,
    /// Window height in pixels
    pub window_height: u32,
    /// Minimum seconds to wait before each navigation
    pub wait_secs_min: u64,
    /// Maximum seconds to wait before each navigation
    pub wait_secs_max: u64,
    /// Proxy address and port. Must be http://host:port even when the
    /// proxied traffic is https.
    pub proxy: Option<String>,
}

impl SessionConfig {
    /// Create a config with default geometry and wait range
    pub fn new(driver_path: impl Into<String>) -> Self {
        Self {
            driver_path: driver_path.into(),
            headless: false,
            user_agent: None,
            window_width: 1200,
            window_height: 800,
            wait_secs_min: 3,
            wait_secs_max: 5,
            proxy: None,
        }
    }

    /// Set headless mode
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set an explicit user agent
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set window size in pixels
    pub fn window_size(mut self, width: u32, height: u32) -> Self {
        self.window_width = width;
        self.window_height = height;
        self
    }

    /// Set the inclusive range of seconds to wait before each navigation
    pub fn wait_range(mut self, min_secs: u64, max_secs: u64) -> Self {
        self.wait_secs_min = min_secs;
        self.wait_secs_max = max_secs;
        self
    }

    /// Set proxy
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Check the config before any external process is launched.
    pub fn validate(&self) -> Result<(), BrowserError> {
        if self.driver_path.is_empty() {
            return Err(BrowserError::InvalidConfig("driver path is empty".into()));
        }
        if self.window_width == 0 || self.window_height == 0 {
            return Err(BrowserError::InvalidConfig(format!(
                "window size must be positive, got {}x{}",
                self.window_width, self.window_height
            )));
        }
        if self.wait_secs_min > self.wait_secs_max {
            return Err(BrowserError::InvalidConfig(format!(
                "wait range is inverted: min {} > max {}",
                self.wait_secs_min, self.wait_secs_max
            )));
        }
        if let Some(ref proxy) = self.proxy {
            validate_proxy(proxy)?;
        }
        Ok(())
    }
}

/// Chrome's --proxy-server switch wants a plain http://host:port authority,
/// even when the proxied traffic is https.
fn validate_proxy(proxy: &str) -> Result<(), BrowserError> {
    let parsed = url::Url::parse(proxy)
        .map_err(|e| BrowserError::InvalidConfig(format!("malformed proxy {:?}: {}", proxy, e)))?;
    if parsed.scheme() != "http" {
        return Err(BrowserError::InvalidConfig(format!(
            "proxy must use the http:// scheme, got {:?}",
            proxy
        )));
    }
    if parsed.host_str().is_none() || parsed.port().is_none() {
        return Err(BrowserError::InvalidConfig(format!(
            "proxy must be http://host:port, got {:?}",
            proxy
        )));
    }
    Ok(())
}

/// Assemble Chrome launch capabilities for a session.
///
/// The flag set is fixed: it strips the automation banner and the
/// AutomationControlled blink feature, sizes the window, and keeps the
/// browser usable in constrained environments.
fn build_capabilities(
    config: &SessionConfig,
    user_agent: &str,
) -> Result<ChromeCapabilities, BrowserError> {
    let launch = |e: WebDriverError| BrowserError::LaunchFailed(e.to_string());

    let mut caps = DesiredCapabilities::chrome();

    // Remove bot-like qualities
    caps.add_experimental_option("excludeSwitches", serde_json::json!(["enable-automation"]))
        .map_err(launch)?;
    caps.add_experimental_option("useAutomationExtension", false)
        .map_err(launch)?;
    caps.add_arg("--disable-blink-features=AutomationControlled")
        .map_err(launch)?;

    caps.add_arg(&format!(
        "window-size={},{}",
        config.window_width, config.window_height
    ))
    .map_err(launch)?;
    caps.add_arg("disable-infobars").map_err(launch)?;
    // Overcome limited /dev/shm in containers
    caps.add_arg("--disable-dev-shm-usage").map_err(launch)?;
    // Required when running as root (e.g. in Docker or on a VPS)
    caps.add_arg("--no-sandbox").map_err(launch)?;
    caps.add_arg(&format!("user-agent={}", user_agent))
        .map_err(launch)?;

    if let Some(ref proxy) = config.proxy {
        caps.add_arg(&format!("--proxy-server={}", proxy))
            .map_err(launch)?;
    }
    if config.headless {
        caps.set_headless().map_err(launch)?;
    }

    Ok(caps)
}

/// Draw a throttling delay uniformly from the inclusive range `[min, max]`
/// seconds. Ordinary pseudo-randomness; the delay is not security-sensitive.
fn pick_delay(min_secs: u64, max_secs: u64) -> Duration {
    Duration::from_secs(rand::thread_rng().gen_range(min_secs..=max_secs))
}

/// A browser session for automation
///
/// Owns both the chromedriver process and the WebDriver connection. Both are
/// released exactly once by [`close`](BrowserSession::close); the process is
/// force-killed on drop if the caller never got there.
#[derive(Debug)]
pub struct BrowserSession {
    /// Session configuration
    config: SessionConfig,
    /// Resolved user agent presented by the browser
    user_agent: String,
    /// WebDriver connection; None once closed
    driver: RwLock<Option<WebDriver>>,
    /// Owned chromedriver process; None once closed
    process: RwLock<Option<DriverProcess>>,
}

impl BrowserSession {
    /// Launch a browser session with the given config.
    ///
    /// Validation happens before anything is spawned, so an invalid config
    /// never leaks a process.
    pub async fn new(config: SessionConfig) -> Result<Self, BrowserError> {
        config.validate()?;

        let user_agent = resolve_user_agent(config.user_agent.as_deref());
        let caps = build_capabilities(&config, &user_agent)?;

        let mut process = DriverProcess::spawn(Path::new(&config.driver_path)).await?;

        info!("Launching browser session (headless: {})", config.headless);
        let driver = match WebDriver::new(&process.url(), caps).await {
            Ok(driver) => driver,
            Err(e) => {
                process.shutdown().await;
                return Err(BrowserError::LaunchFailed(e.to_string()));
            }
        };

        // Session-wide default timeout for element lookups.
        if let Err(e) = driver
            .set_implicit_wait_timeout(Duration::from_secs(config.wait_secs_min))
            .await
        {
            let _ = driver.quit().await;
            process.shutdown().await;
            return Err(BrowserError::LaunchFailed(e.to_string()));
        }

        info!("Browser session ready (user agent: {})", user_agent);

        Ok(Self {
            config,
            user_agent,
            driver: RwLock::new(Some(driver)),
            process: RwLock::new(Some(process)),
        })
    }

    /// The user agent the browser presents.
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether the session has not been closed yet.
    pub async fn is_open(&self) -> bool {
        self.driver.read().await.is_some()
    }

    /// Navigate to a URL after the throttling delay.
    ///
    /// Every navigation is preceded by a uniform random delay from the
    /// configured wait range; a zero range navigates immediately. Failures
    /// from the driver are surfaced, never retried.
    pub async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        // Refuse a closed session up front rather than after the delay.
        if self.driver.read().await.is_none() {
            return Err(BrowserError::SessionClosed);
        }

        let delay = pick_delay(self.config.wait_secs_min, self.config.wait_secs_max);
        info!(
            "Waiting {}s before navigation (range {}..={}s)",
            delay.as_secs(),
            self.config.wait_secs_min,
            self.config.wait_secs_max
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let guard = self.driver.read().await;
        let driver = guard.as_ref().ok_or(BrowserError::SessionClosed)?;

        debug!("Navigating to {}", url);
        driver
            .goto(url)
            .await
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))
    }

    /// Visit a couple of well-known pages so the session carries cookies.
    ///
    /// Some websites find it suspicious when no cookies exist. Both visits
    /// go through [`navigate`](BrowserSession::navigate), so the usual
    /// throttling delay applies to each.
    pub async fn warm_up_cookies(&self) -> Result<(), BrowserError> {
        self.navigate(WARM_UP_URL).await?;
        self.navigate(WARM_UP_SEARCH_URL).await
    }

    /// Close the browser and the chromedriver process.
    ///
    /// Safe to call more than once; every call after the first is a no-op.
    pub async fn close(&self) -> Result<(), BrowserError> {
        let driver = self.driver.write().await.take();
        match driver {
            Some(driver) => {
                // Graceful quit first; the process shutdown below covers a
                // driver that no longer responds.
                if let Err(e) = driver.quit().await {
                    debug!("Driver quit failed during close: {}", e);
                }
            }
            None => return Ok(()),
        }

        if let Some(mut process) = self.process.write().await.take() {
            process.shutdown().await;
        }

        info!("Browser session closed");
        Ok(())
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        // kill_on_drop on the chromedriver child reaps the process when the
        // caller never reached close().
        debug!("BrowserSession dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use thirtyfour::CapabilitiesHelper;

    fn base_config() -> SessionConfig {
        SessionConfig::new("/usr/bin/chromedriver")
    }

    /// A session whose driver and process are already released.
    fn closed_session(config: SessionConfig) -> BrowserSession {
        BrowserSession {
            config,
            user_agent: "test-agent".into(),
            driver: RwLock::new(None),
            process: RwLock::new(None),
        }
    }

    fn chrome_options(caps: &ChromeCapabilities) -> &serde_json::Value {
        caps._get("goog:chromeOptions").expect("chrome options present")
    }

    fn chrome_args(caps: &ChromeCapabilities) -> Vec<String> {
        chrome_options(caps)["args"]
            .as_array()
            .expect("args array")
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn inverted_wait_range_is_rejected() {
        let err = base_config().wait_range(5, 3).validate().unwrap_err();
        assert!(matches!(err, BrowserError::InvalidConfig(_)));
    }

    #[test]
    fn zero_window_dimension_is_rejected() {
        let err = base_config().window_size(0, 768).validate().unwrap_err();
        assert!(matches!(err, BrowserError::InvalidConfig(_)));

        let err = base_config().window_size(1024, 0).validate().unwrap_err();
        assert!(matches!(err, BrowserError::InvalidConfig(_)));
    }

    #[test]
    fn empty_driver_path_is_rejected() {
        let err = SessionConfig::new("").validate().unwrap_err();
        assert!(matches!(err, BrowserError::InvalidConfig(_)));
    }

    #[test]
    fn proxy_requires_http_host_port_authority() {
        assert!(base_config()
            .proxy("http://127.0.0.1:8080")
            .validate()
            .is_ok());

        for bad in [
            "127.0.0.1:8080",
            "socks5://127.0.0.1:1080",
            "https://127.0.0.1:8080",
            "http://proxy.example.com",
            "not a proxy",
        ] {
            let err = base_config().proxy(bad).validate().unwrap_err();
            assert!(
                matches!(err, BrowserError::InvalidConfig(_)),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn capabilities_carry_proxy_when_configured() {
        let config = base_config().proxy("http://127.0.0.1:8080");
        let caps = build_capabilities(&config, "test-agent").unwrap();
        let args = chrome_args(&caps);
        assert!(args.contains(&"--proxy-server=http://127.0.0.1:8080".to_string()));
    }

    #[test]
    fn capabilities_omit_proxy_when_unset() {
        let caps = build_capabilities(&base_config(), "test-agent").unwrap();
        let args = chrome_args(&caps);
        assert!(!args.iter().any(|a| a.starts_with("--proxy-server")));
    }

    #[test]
    fn capabilities_strip_automation_markers() {
        let config = base_config().headless(true).window_size(1024, 768);
        let caps = build_capabilities(&config, "test-agent").unwrap();

        let args = chrome_args(&caps);
        assert!(args.contains(&"--disable-blink-features=AutomationControlled".to_string()));
        assert!(args.contains(&"window-size=1024,768".to_string()));
        assert!(args.contains(&"disable-infobars".to_string()));
        assert!(args.contains(&"--disable-dev-shm-usage".to_string()));
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert!(args.contains(&"user-agent=test-agent".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--headless")));

        let options = chrome_options(&caps);
        assert_eq!(
            options["excludeSwitches"],
            serde_json::json!(["enable-automation"])
        );
        assert_eq!(options["useAutomationExtension"], serde_json::json!(false));
    }

    #[test]
    fn headless_flag_is_absent_by_default() {
        let caps = build_capabilities(&base_config(), "test-agent").unwrap();
        let args = chrome_args(&caps);
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn delay_draws_stay_in_inclusive_range() {
        let mut seen = HashSet::new();
        for _ in 0..500 {
            let secs = pick_delay(1, 3).as_secs();
            assert!((1..=3).contains(&secs));
            seen.insert(secs);
        }
        // Over many draws both endpoints should show up.
        assert!(seen.contains(&1));
        assert!(seen.contains(&3));
    }

    #[test]
    fn zero_range_means_no_delay() {
        assert!(pick_delay(0, 0).is_zero());
    }

    #[test]
    fn degenerate_range_is_constant() {
        for _ in 0..10 {
            assert_eq!(pick_delay(4, 4).as_secs(), 4);
        }
    }

    #[tokio::test]
    async fn close_is_a_no_op_after_the_first_call() {
        let session = closed_session(base_config());
        assert!(session.close().await.is_ok());
        assert!(session.close().await.is_ok());
        assert!(!session.is_open().await);
    }

    #[tokio::test]
    async fn navigate_after_close_fails_without_delaying() {
        // Wide wait range: the closed check must fire before the throttle
        // delay, so this returns immediately.
        let session = closed_session(base_config().wait_range(60, 120));
        let started = std::time::Instant::now();
        let err = session.navigate("https://example.com").await.unwrap_err();
        assert!(matches!(err, BrowserError::SessionClosed));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn invalid_config_fails_before_any_launch() {
        // The driver path does not exist; validation must reject the config
        // before the spawn is ever attempted.
        let config = SessionConfig::new("/nonexistent/chromedriver").wait_range(5, 3);
        let err = BrowserSession::new(config).await.unwrap_err();
        assert!(matches!(err, BrowserError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn missing_driver_binary_is_a_launch_error() {
        let config = SessionConfig::new("/nonexistent/chromedriver");
        let err = BrowserSession::new(config).await.unwrap_err();
        assert!(matches!(err, BrowserError::LaunchFailed(_)));
    }
}
