//! User agent resolution
//!
//! Some sites flag the default automation user agent outright. When the
//! caller does not supply one, we synthesize a user agent that matches the
//! host platform and the locally installed browser version.

use std::path::PathBuf;

use tracing::{info, warn};

/// Fallback when no local Chrome/Chromium binary can be queried.
const FALLBACK_CHROME_VERSION: &str = "131.0.6778.139";

/// Resolve the effective user agent for a session.
///
/// An explicit non-empty value is returned unchanged; otherwise one is built
/// from the host platform and the detected browser version.
pub fn resolve_user_agent(explicit: Option<&str>) -> String {
    info!("Looking for supplied user agent");
    if let Some(ua) = explicit {
        if !ua.is_empty() {
            return ua.to_string();
        }
    }

    info!("No user agent supplied, building one");
    let version = detect_browser_version().unwrap_or_else(|| {
        warn!(
            "Could not detect browser version, defaulting to {}",
            FALLBACK_CHROME_VERSION
        );
        FALLBACK_CHROME_VERSION.to_string()
    });

    let user_agent = format!(
        "Mozilla/5.0 (X11; {}{}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{} Safari/537.36",
        system_name(),
        std::env::consts::ARCH,
        version,
    );
    info!("Synthesized user agent: {}", user_agent);
    user_agent
}

/// Host OS name as platform identification reports it.
fn system_name() -> &'static str {
    match std::env::consts::OS {
        "linux" => "Linux",
        "macos" => "Darwin",
        "windows" => "Windows",
        other => other,
    }
}

/// Detect the full version of the installed Chrome/Chromium binary,
/// e.g. "142.0.7444.175".
fn detect_browser_version() -> Option<String> {
    let browser_path = find_browser()?;
    let output = std::process::Command::new(&browser_path)
        .arg("--version")
        .output()
        .ok()?;
    let version_str = String::from_utf8_lossy(&output.stdout);
    // Parse "Google Chrome 142.0.7444.175" or "Chromium 142.0.7444.175"
    let version = version_str
        .split_whitespace()
        .find(|s| s.contains('.'))?
        .trim()
        .to_string();
    info!("Detected browser version: {}", version);
    Some(version)
}

/// Find a Chrome/Chromium executable on the system
fn find_browser() -> Option<PathBuf> {
    let candidates: Vec<PathBuf> = if cfg!(target_os = "windows") {
        let mut paths = vec![
            PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
            PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        ];
        if let Ok(local) = std::env::var("LOCALAPPDATA") {
            paths.push(PathBuf::from(format!(
                r"{}\Google\Chrome\Application\chrome.exe",
                local
            )));
        }
        paths
    } else if cfg!(target_os = "macos") {
        vec![PathBuf::from(
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        )]
    } else {
        vec![
            PathBuf::from("/usr/bin/chromium"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/google-chrome-stable"),
        ]
    };

    candidates.into_iter().find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_user_agent_is_returned_unchanged() {
        let ua = "Mozilla/5.0 (TestRig; rv:1.0) Gecko/20100101";
        assert_eq!(resolve_user_agent(Some(ua)), ua);
    }

    #[test]
    fn empty_user_agent_falls_back_to_synthesis() {
        let ua = resolve_user_agent(Some(""));
        assert!(ua.starts_with("Mozilla/5.0"));
    }

    #[test]
    fn synthesized_user_agent_names_host_platform() {
        let ua = resolve_user_agent(None);
        assert!(!ua.is_empty());
        assert!(ua.contains(system_name()));
        assert!(ua.contains(std::env::consts::ARCH));
        assert!(ua.ends_with("Safari/537.36"));
    }

    #[test]
    fn synthesized_user_agent_carries_a_real_version_token() {
        let ua = resolve_user_agent(None);
        // Either a detected version or the pinned fallback; never a template.
        assert!(!ua.contains('{') && !ua.contains('}'));
        assert!(ua.contains("Chrome/"));
    }
}
