//! Mapping content identifiers and `ipfs://` URIs onto an HTTPS gateway.

use crate::config::DEFAULT_IPFS_GATEWAY;

pub const IPFS_SCHEME: &str = "ipfs://";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IpfsGateway {
    host: String,
}

impl Default for IpfsGateway {
    fn default() -> Self {
        Self::new(DEFAULT_IPFS_GATEWAY)
    }
}

impl IpfsGateway {
    pub fn new(host: &str) -> Self {
        let host = host.trim();
        let host = host.strip_prefix("https://").or_else(|| host.strip_prefix("http://")).unwrap_or(host);
        Self { host: host.trim_end_matches('/').to_string() }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Subdomain gateway URL for `cid`, optionally pointing at a file inside a directory upload.
    pub fn ipfs_url(&self, cid: &str, filename: Option<&str>) -> String {
        let base = format!("https://{cid}.ipfs.{}", self.host);
        match filename {
            Some(name) => format!("{base}/{name}"),
            None => base,
        }
    }

    /// Turns whatever a record stores (`ipfs://` URI, HTTP URL or bare CID) into a fetchable URL.
    pub fn resolve_uri(&self, uri: &str) -> String {
        let uri = uri.trim();
        if let Some(path) = uri.strip_prefix(IPFS_SCHEME) {
            return format!("https://{}/ipfs/{path}", self.host);
        }
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return uri.to_string();
        }
        format!("https://{}/ipfs/{uri}", self.host)
    }
}

pub fn ipfs_uri(cid: &str) -> String {
    format!("{IPFS_SCHEME}{cid}")
}

/// Name a page gets inside a directory upload: zero-padded position then the original name, so
/// gateway listings keep reading order.
pub fn directory_entry_name(index: usize, name: &str) -> String {
    format!("{index:03}_{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CID: &str = "bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi";

    #[test]
    fn gateway_urls_are_stable() {
        let gw = IpfsGateway::default();
        let base = gw.ipfs_url(CID, None);
        assert_eq!(base, format!("https://{CID}.ipfs.w3s.link"));
        assert_eq!(gw.ipfs_url(CID, Some("file.png")), format!("{base}/file.png"));
        assert_eq!(gw.ipfs_url(CID, None), base);
    }

    #[test]
    fn resolves_every_stored_form() {
        let gw = IpfsGateway::new("https://dweb.link/");
        assert_eq!(gw.host(), "dweb.link");
        assert_eq!(gw.resolve_uri(&ipfs_uri(CID)), format!("https://dweb.link/ipfs/{CID}"));
        assert_eq!(gw.resolve_uri("ipfs://abc/000_p.png"), "https://dweb.link/ipfs/abc/000_p.png");
        assert_eq!(gw.resolve_uri("https://example.org/x.json"), "https://example.org/x.json");
        assert_eq!(gw.resolve_uri(CID), format!("https://dweb.link/ipfs/{CID}"));
    }

    #[test]
    fn gateway_host_drops_either_scheme() {
        for configured in ["http://dweb.link", "https://dweb.link/", " dweb.link "] {
            let gw = IpfsGateway::new(configured);
            assert_eq!(gw.host(), "dweb.link");
            assert_eq!(gw.ipfs_url(CID, None), format!("https://{CID}.ipfs.dweb.link"));
        }
    }

    #[test]
    fn directory_names_keep_page_order() {
        assert_eq!(directory_entry_name(0, "cover.png"), "000_cover.png");
        assert_eq!(directory_entry_name(12, "p.jpg"), "012_p.jpg");
        assert_eq!(directory_entry_name(1234, "p.jpg"), "1234_p.jpg");
    }
}
