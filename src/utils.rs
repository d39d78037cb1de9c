use crate::{Result, ScanError};
use log::{debug, error, info};
use std::path::Path;
use tokio::fs;

/// Target validation and canonicalization
pub mod target {
    use super::*;
    use crate::types::ScanTarget;
    use lazy_static::lazy_static;
    use regex::Regex;
    use std::net::IpAddr;
    use url::Url;

    lazy_static! {
        static ref TARGET_RE: Regex =
            Regex::new(r"^(https?://)?[a-zA-Z0-9.-]+(:[0-9]+)?(/.*)?$").expect("target pattern");
    }

    /// Validate a user supplied target and extract the bare host to probe.
    ///
    /// IPv4/IPv6 literals are accepted as-is; anything else must look like
    /// `[http(s)://]host[:port][/path]`.
    pub fn validate_target(input: &str) -> Result<ScanTarget> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(ScanError::InvalidTarget("empty target".to_string()));
        }

        if let Ok(ip) = raw.parse::<IpAddr>() {
            return Ok(ScanTarget {
                raw: raw.to_string(),
                host: ip.to_string(),
                port: None,
            });
        }

        if !TARGET_RE.is_match(raw) {
            return Err(ScanError::InvalidTarget(format!("{} (must be IP or URL)", raw)));
        }

        let with_scheme = if raw.starts_with("http://") || raw.starts_with("https://") {
            raw.to_string()
        } else {
            format!("http://{}", raw)
        };
        let url = Url::parse(&with_scheme)
            .map_err(|e| ScanError::InvalidTarget(format!("{}: {}", raw, e)))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ScanError::InvalidTarget(format!("{} has no host", raw)))?;

        debug!("Validated target {} as host {}", raw, host);
        Ok(ScanTarget {
            raw: raw.to_string(),
            host: host.to_string(),
            port: url.port(),
        })
    }

    /// Hosts from a file, one per line. Blank lines and `#` comments are skipped.
    pub async fn load_host_list(path: &Path) -> Result<Vec<String>> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| ScanError::InvalidInput(format!("Failed to read host list {}: {}", path.display(), e)))?;

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect())
    }

}

/// File and wordlist utilities
pub mod wordlist {
    use super::*;

    /// Load a wordlist from file. Every non-blank line is a path segment.
    pub async fn load_wordlist(path: &Path) -> Result<Vec<String>> {
        if !path.exists() {
            return Err(ScanError::Wordlist(format!("Wordlist file not found: {}", path.display())));
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| ScanError::Wordlist(format!("Failed to read {}: {}", path.display(), e)))?;

        let words: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        info!("Loaded {} words from {}", words.len(), path.display());
        Ok(words)
    }

    /// Concatenate several wordlists in order.
    ///
    /// Unreadable files are logged and skipped; it is an error only when
    /// nothing at all could be loaded.
    pub async fn load_wordlists<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<String>> {
        if paths.is_empty() {
            return Err(ScanError::Wordlist("no wordlist configured (set fuzz.wordlist)".to_string()));
        }

        let mut words = Vec::new();
        for path in paths {
            match load_wordlist(path.as_ref()).await {
                Ok(mut list) => words.append(&mut list),
                Err(e) => error!("{}", e),
            }
        }

        if words.is_empty() {
            return Err(ScanError::Wordlist("no valid wordlist loaded".to_string()));
        }
        Ok(words)
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::io::Write;

        #[tokio::test]
        async fn test_every_non_blank_line_is_a_word() {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "admin\n\n  #backup  \n.git\n   ").unwrap();

            let words = load_wordlist(file.path()).await.unwrap();
            assert_eq!(words, vec!["admin", "#backup", ".git"]);
        }

        #[tokio::test]
        async fn test_missing_lists_are_skipped() {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "robots.txt").unwrap();
            let paths = vec![file.path().to_path_buf(), std::path::PathBuf::from("/nonexistent/words.txt")];

            assert_eq!(load_wordlists(&paths).await.unwrap(), vec!["robots.txt"]);
            assert!(load_wordlists(&paths[1..]).await.is_err());
        }
    }
}

/// HTTP client construction and scheme viability
pub mod http {
    use super::*;
    use crate::executor::RetryPolicy;
    use crate::types::{ScanTarget, Scheme};
    use futures::future::join_all;
    use reqwest::{redirect::Policy, Client, Response, StatusCode};
    use std::time::Duration;

    pub fn build_client(timeout: Duration) -> Result<Client> {
        Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .redirect(Policy::none())
            .user_agent(concat!("mch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ScanError::Http)
    }

    /// Turn a 429 into a transient error so the executor backs off.
    pub fn reject_rate_limit(response: Response) -> Result<Response> {
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(ScanError::RateLimited {
                url: response.url().to_string(),
            });
        }
        Ok(response)
    }

    /// A scheme is viable when `/` answers below 500 on any of the attempts.
    pub async fn is_viable(client: &Client, url: &str, retry: RetryPolicy) -> bool {
        for attempt in 1..=retry.attempts {
            match client.head(url).send().await {
                Ok(response) if response.status().as_u16() < 500 => {
                    debug!("{} is viable ({})", url, response.status());
                    return true;
                }
                Ok(response) => debug!("{} answered {} (attempt {})", url, response.status(), attempt),
                Err(e) => debug!("{} unreachable (attempt {}): {}", url, attempt, e),
            }
            if attempt < retry.attempts {
                tokio::time::sleep(retry.delay_for(attempt)).await;
            }
        }
        false
    }

    pub async fn viable_schemes(client: &Client, target: &ScanTarget, retry: RetryPolicy) -> Vec<Scheme> {
        let checks = Scheme::ALL.into_iter().map(|scheme| async move {
            let url = format!("{}/", target.origin(scheme));
            (scheme, is_viable(client, &url, retry).await)
        });

        let schemes: Vec<Scheme> = join_all(checks)
            .await
            .into_iter()
            .filter_map(|(scheme, viable)| viable.then_some(scheme))
            .collect();

        if schemes.is_empty() {
            info!("Neither http nor https answers on {}", target);
        }
        schemes
    }
}

/// Progress reporting utilities
pub mod progress {
    use colored::*;
    use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
    use std::time::Duration;

    /// One bar per scanner, stacked under a shared [`MultiProgress`]
    pub fn create_scanner_bar(multi: &MultiProgress, prefix: &str) -> ProgressBar {
        let pb = multi.add(ProgressBar::new(0));

        pb.set_style(
            ProgressStyle::default_bar()
                .template(&format!(
                    "  {:<6} [{{bar:20.cyan/bright_black}}] {{pos}}/{{len}} {{msg}}",
                    prefix.bright_blue()
                ))
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏ "),
        );

        pb.enable_steady_tick(Duration::from_millis(150));
        pb
    }
}

/// Time and formatting utilities
pub mod time {
    use chrono::{DateTime, Utc};
    use std::time::Duration;

    /// Get current UTC timestamp
    pub fn now_utc() -> DateTime<Utc> {
        Utc::now()
    }

    /// Format duration as human readable string
    pub fn format_duration(duration: Duration) -> String {
        let secs = duration.as_secs();
        let hours = secs / 3600;
        let minutes = (secs % 3600) / 60;
        let seconds = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else if secs > 0 {
            format!("{}s", seconds)
        } else {
            format!("{}ms", duration.as_millis())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_format_duration() {
            assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
            assert_eq!(format_duration(Duration::from_secs(42)), "42s");
            assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
            assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
        }
    }
}
