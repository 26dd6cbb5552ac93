//! GitHub-compatible release registry over blocking HTTP.
//!
//! Three endpoints are used: the "latest release" query, the directory
//! contents listing at a tag, and raw file downloads. Base URLs come from
//! the configuration so that mirrors and GitHub Enterprise hosts work too.

use super::listing::{parse_latest_tag, parse_listing};
use super::{Listing, ReleaseError, ReleaseSource};
use crate::config::UpdaterConfig;
use crate::repo::RepoLocator;
use crate::version::VersionTag;
use std::io::Read;
use ureq::Body;
use ureq::http::{Response, StatusCode};

const API_ACCEPT: &str = "application/vnd.github+json";
const USER_AGENT: &str = concat!("ota-updater/", env!("CARGO_PKG_VERSION"));

/// Release source backed by `ureq`.
///
/// Requests block until headers arrive. Unless a timeout is configured
/// they may wait indefinitely.
///
/// # Examples
///
/// ```
/// use ota_updater::config::UpdaterConfig;
/// use ota_updater::release::github::GithubReleaseSource;
///
/// let config = UpdaterConfig::new("acme/firmware".parse().expect("valid repo"));
/// let source = GithubReleaseSource::new(&config);
/// assert!(source.latest_url().ends_with("/repos/acme/firmware/releases/latest"));
/// ```
pub struct GithubReleaseSource {
    agent: ureq::Agent,
    repo: RepoLocator,
    api_base: String,
    raw_base: String,
    headers: Vec<(String, String)>,
}

impl GithubReleaseSource {
    /// Build a source for the repository and endpoints in `config`.
    ///
    /// The access token, when present, is sent as a bearer token on every
    /// request alongside any configured extra headers.
    #[must_use]
    pub fn new(config: &UpdaterConfig) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(config.timeout)
            .build();
        let mut headers: Vec<(String, String)> = config
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        if let Some(token) = &config.access_token {
            headers.push(("Authorization".to_owned(), format!("Bearer {token}")));
        }
        Self {
            agent: ureq::Agent::new_with_config(agent_config),
            repo: config.repo.clone(),
            api_base: config.api_base.trim_end_matches('/').to_owned(),
            raw_base: config.raw_base.trim_end_matches('/').to_owned(),
            headers,
        }
    }

    /// URL of the "latest release" query.
    #[must_use]
    pub fn latest_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_base,
            self.repo.owner(),
            self.repo.name()
        )
    }

    /// URL listing `path` at `tag`.
    #[must_use]
    pub fn contents_url(&self, tag: &VersionTag, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}?ref=refs/tags/{tag}",
            self.api_base,
            self.repo.owner(),
            self.repo.name(),
            path.trim_matches('/')
        )
    }

    /// URL of the raw content of `path` at `tag`.
    #[must_use]
    pub fn raw_url(&self, tag: &VersionTag, path: &str) -> String {
        format!(
            "{}/{}/{}/{tag}/{}",
            self.raw_base,
            self.repo.owner(),
            self.repo.name(),
            path.trim_start_matches('/')
        )
    }

    fn get(&self, url: &str, api: bool) -> Result<Response<Body>, ReleaseError> {
        let mut request = self.agent.get(url).header("User-Agent", USER_AGENT);
        if api {
            request = request.header("Accept", API_ACCEPT);
        }
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        log::trace!("GET {url}");
        request.call().map_err(|e| ReleaseError::Network {
            url: url.to_owned(),
            reason: e.to_string(),
        })
    }
}

impl ReleaseSource for GithubReleaseSource {
    fn latest_tag(&self) -> Result<VersionTag, ReleaseError> {
        let url = self.latest_url();
        let response = self.get(&url, true)?;
        let status = response.status();
        let body = read_body(&url, response)?;
        latest_from_reply(&url, status, &body)
    }

    fn list_entries(&self, tag: &VersionTag, sub_path: &str) -> Result<Listing, ReleaseError> {
        let url = self.contents_url(tag, sub_path);
        let response = self.get(&url, true)?;
        let status = response.status();
        let body = read_body(&url, response)?;
        if status.is_success() {
            return parse_listing(&url, &body);
        }
        Err(status_error(
            &url,
            status,
            format!("directory {sub_path:?} at {tag}"),
            body,
        ))
    }

    fn fetch_file(&self, tag: &VersionTag, path: &str) -> Result<Box<dyn Read>, ReleaseError> {
        let url = self.raw_url(tag, path);
        let response = self.get(&url, false)?;
        let status = response.status();
        if status.is_success() {
            return Ok(Box::new(response.into_body().into_reader()));
        }
        let body = read_body(&url, response).unwrap_or_default();
        Err(status_error(&url, status, format!("file {path:?} at {tag}"), body))
    }
}

/// Interpret a "latest release" reply. A 404 is parsed like a success so
/// that the registry's own message travels with the error.
fn latest_from_reply(
    url: &str,
    status: StatusCode,
    body: &str,
) -> Result<VersionTag, ReleaseError> {
    if status == StatusCode::NOT_FOUND || status.is_success() {
        return parse_latest_tag(url, body);
    }
    Err(status_error(url, status, "latest release".to_owned(), body.to_owned()))
}

fn read_body(url: &str, response: Response<Body>) -> Result<String, ReleaseError> {
    response
        .into_body()
        .read_to_string()
        .map_err(|e| ReleaseError::Network {
            url: url.to_owned(),
            reason: format!("reading response body: {e}"),
        })
}

/// Map a non-success status: 404 means `what` is missing, anything else
/// is a failed request.
fn status_error(url: &str, status: StatusCode, what: String, body: String) -> ReleaseError {
    if status == StatusCode::NOT_FOUND {
        return ReleaseError::NotFound {
            what,
            url: url.to_owned(),
            body,
        };
    }
    ReleaseError::Network {
        url: url.to_owned(),
        reason: format!("HTTP status {status}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    const URL: &str = "https://api.example.test/x";

    /// Answer one request on loopback with `status_line` and `body`.
    ///
    /// Returns the base URL and a handle yielding the raw request head.
    fn serve_once(status_line: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let base = format!("http://{}", listener.local_addr().expect("local addr"));
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
            let mut head = String::new();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).expect("read request line");
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                head.push_str(&line);
            }
            write!(
                stream,
                "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .expect("write response");
            head
        });
        (base, handle)
    }

    fn source_with(config_edit: impl FnOnce(&mut UpdaterConfig)) -> GithubReleaseSource {
        let mut config = UpdaterConfig::new("acme/firmware".parse().expect("repo"));
        config_edit(&mut config);
        GithubReleaseSource::new(&config)
    }

    #[test]
    fn urls_follow_registry_layout() {
        let source = source_with(|_| {});
        let tag = VersionTag::from("v2.0");
        assert_eq!(
            source.latest_url(),
            "https://api.github.com/repos/acme/firmware/releases/latest"
        );
        assert_eq!(
            source.contents_url(&tag, "/src/app/lib/"),
            "https://api.github.com/repos/acme/firmware/contents/src/app/lib?ref=refs/tags/v2.0"
        );
        assert_eq!(
            source.raw_url(&tag, "src/app/main.py"),
            "https://raw.githubusercontent.com/acme/firmware/v2.0/src/app/main.py"
        );
    }

    #[test]
    fn custom_bases_drop_trailing_slashes() {
        let source = source_with(|config| {
            config.api_base = "http://mirror.local/api/".to_owned();
            config.raw_base = "http://mirror.local/raw/".to_owned();
        });
        let tag = VersionTag::from("t");
        assert_eq!(
            source.latest_url(),
            "http://mirror.local/api/repos/acme/firmware/releases/latest"
        );
        assert_eq!(
            source.raw_url(&tag, "a.py"),
            "http://mirror.local/raw/acme/firmware/t/a.py"
        );
    }

    #[test]
    fn token_becomes_bearer_header() {
        let source = source_with(|config| {
            config.access_token = Some("s3cret".to_owned());
            config
                .headers
                .insert("X-Device".to_owned(), "unit-7".to_owned());
        });
        assert!(
            source
                .headers
                .contains(&("Authorization".to_owned(), "Bearer s3cret".to_owned()))
        );
        assert!(
            source
                .headers
                .contains(&("X-Device".to_owned(), "unit-7".to_owned()))
        );
    }

    #[test]
    fn anonymous_access_sends_no_authorization() {
        let source = source_with(|_| {});
        assert!(source.headers.iter().all(|(name, _)| name != "Authorization"));
    }

    #[test]
    fn unreachable_registry_is_network_error() {
        // Port 9 on loopback is the discard service and is closed on test hosts.
        let source = source_with(|config| {
            config.api_base = "http://127.0.0.1:9".to_owned();
            config.timeout = Some(Duration::from_secs(5));
        });
        let err = source.latest_tag().expect_err("nothing listens there");
        assert!(matches!(err, ReleaseError::Network { .. }));
    }

    #[rstest]
    #[case::list_not_found(StatusCode::NOT_FOUND, true)]
    #[case::server_error(StatusCode::INTERNAL_SERVER_ERROR, false)]
    #[case::rate_limited(StatusCode::FORBIDDEN, false)]
    #[case::unauthorised(StatusCode::UNAUTHORIZED, false)]
    fn status_error_maps_404_to_not_found_and_the_rest_to_network(
        #[case] status: StatusCode,
        #[case] not_found: bool,
    ) {
        let err = status_error(URL, status, "thing".to_owned(), "body".to_owned());
        match err {
            ReleaseError::NotFound { what, url, body } => {
                assert!(not_found, "{status} should not be NotFound");
                assert_eq!((what.as_str(), url.as_str(), body.as_str()), ("thing", URL, "body"));
            }
            ReleaseError::Network { reason, .. } => {
                assert!(!not_found, "404 should be NotFound");
                assert!(reason.contains(status.as_str()), "{reason}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn latest_reply_404_keeps_registry_body() {
        let body = r#"{"message":"Not Found"}"#;
        let err = latest_from_reply(URL, StatusCode::NOT_FOUND, body).expect_err("no latest");
        assert!(matches!(err, ReleaseError::NotFound { body: ref b, .. } if b == body));
    }

    #[test]
    fn latest_reply_success_yields_tag() {
        let tag = latest_from_reply(URL, StatusCode::OK, r#"{"tag_name":"v3.1"}"#).expect("tag");
        assert_eq!(tag.as_str(), "v3.1");
    }

    #[test]
    fn latest_reply_server_error_is_network() {
        let err = latest_from_reply(URL, StatusCode::BAD_GATEWAY, "oops").expect_err("502");
        assert!(matches!(err, ReleaseError::Network { .. }));
    }

    #[test]
    fn latest_request_sends_auth_and_extra_headers() {
        let (base, server) = serve_once("200 OK", r#"{"tag_name":"v9.0"}"#);
        let source = source_with(|config| {
            config.api_base = base;
            config.access_token = Some("s3cret".to_owned());
            config
                .headers
                .insert("X-Device".to_owned(), "unit-7".to_owned());
            config.timeout = Some(Duration::from_secs(5));
        });

        let tag = source.latest_tag().expect("latest tag");
        let head = server.join().expect("server thread").to_ascii_lowercase();

        assert_eq!(tag.as_str(), "v9.0");
        assert!(head.starts_with("get /repos/acme/firmware/releases/latest "), "{head}");
        assert!(head.contains("authorization: bearer s3cret"), "{head}");
        assert!(head.contains("x-device: unit-7"), "{head}");
        assert!(head.contains("accept: application/vnd.github+json"), "{head}");
    }

    #[test]
    fn missing_directory_is_not_found_over_http() {
        let (base, server) = serve_once("404 Not Found", r#"{"message":"Not Found"}"#);
        let source = source_with(|config| {
            config.api_base = base;
            config.timeout = Some(Duration::from_secs(5));
        });

        let err = source
            .list_entries(&VersionTag::from("v2.0"), "app")
            .expect_err("404");
        server.join().expect("server thread");

        assert!(matches!(err, ReleaseError::NotFound { ref body, .. } if body.contains("Not Found")));
    }

    #[test]
    fn failing_file_download_is_network_over_http() {
        let (base, server) = serve_once("500 Internal Server Error", "boom");
        let source = source_with(|config| {
            config.raw_base = base;
            config.timeout = Some(Duration::from_secs(5));
        });

        let err = source
            .fetch_file(&VersionTag::from("v2.0"), "app/main.py")
            .err()
            .expect("500");
        server.join().expect("server thread");

        assert!(matches!(err, ReleaseError::Network { .. }));
    }
}
