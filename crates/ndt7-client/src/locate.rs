//! Server URL construction from a location identifier.

use ndt7_common::protocol::SubtestKind;

/// Template used when none is configured.
pub const DEFAULT_URL_TEMPLATE: &str = "wss://{location}.medidor.rnp.br:4443/ndt/v7/{subtest}";

/// Download and upload endpoints of one measurement server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerUrls {
    pub download: String,
    pub upload: String,
}

impl ServerUrls {
    /// Expand `template` for `location` (lowercased).
    pub fn from_template(template: &str, location: &str) -> Self {
        let location = location.trim().to_lowercase();
        let expand = |kind: SubtestKind| {
            template
                .replace("{location}", &location)
                .replace("{subtest}", kind.as_str())
        };
        Self {
            download: expand(SubtestKind::Download),
            upload: expand(SubtestKind::Upload),
        }
    }

    pub fn for_kind(&self, kind: SubtestKind) -> &str {
        match kind {
            SubtestKind::Download => &self.download,
            SubtestKind::Upload => &self.upload,
        }
    }

    /// Host name of the download endpoint, without port.
    pub fn server_name(&self) -> &str {
        host_of(extract_authority(&self.download))
    }
}

/// `host:port` of a server URL, without scheme or path.
fn extract_authority(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.split('/').next().unwrap_or("")
}

/// Host part of a `host:port` endpoint. IPv6 brackets are removed.
pub fn host_of(endpoint: &str) -> &str {
    if let Some(rest) = endpoint.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    endpoint.split(':').next().unwrap_or(endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template_expands() {
        let urls = ServerUrls::from_template(DEFAULT_URL_TEMPLATE, "SP");
        assert_eq!(urls.download, "wss://sp.medidor.rnp.br:4443/ndt/v7/download");
        assert_eq!(urls.upload, "wss://sp.medidor.rnp.br:4443/ndt/v7/upload");
        assert_eq!(urls.for_kind(SubtestKind::Upload), urls.upload);
        assert_eq!(urls.server_name(), "sp.medidor.rnp.br");
    }

    #[test]
    fn custom_template_without_location() {
        let urls = ServerUrls::from_template("ws://127.0.0.1:9000/ndt/v7/{subtest}", "rj");
        assert_eq!(urls.download, "ws://127.0.0.1:9000/ndt/v7/download");
        assert_eq!(urls.server_name(), "127.0.0.1");
    }

    #[test]
    fn authority_of_ndt7_urls() {
        assert_eq!(
            extract_authority("wss://rj.medidor.rnp.br:4443/ndt/v7/download"),
            "rj.medidor.rnp.br:4443"
        );
        assert_eq!(
            extract_authority("ws://127.0.0.1:9000/ndt/v7/upload"),
            "127.0.0.1:9000"
        );
        assert_eq!(
            extract_authority("wss://[2001:db8::1]:4443/ndt/v7/download"),
            "[2001:db8::1]:4443"
        );
        assert_eq!(extract_authority("sp.medidor.rnp.br:4443"), "sp.medidor.rnp.br:4443");
        assert_eq!(extract_authority(""), "");
    }

    #[test]
    fn server_name_of_ipv6_template() {
        let urls = ServerUrls::from_template("wss://[2001:db8::1]:4443/ndt/v7/{subtest}", "rj");
        assert_eq!(urls.server_name(), "2001:db8::1");
    }

    #[test]
    fn host_of_endpoints() {
        assert_eq!(host_of("192.0.2.7:51234"), "192.0.2.7");
        assert_eq!(host_of("[2001:db8::1]:4443"), "2001:db8::1");
        assert_eq!(host_of("example.org"), "example.org");
        assert_eq!(host_of(""), "");
    }
}
