//! Pre-login site probe: server version and installed extensions.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::codec::{self, Params};
use crate::error::{ApiError, Error, Result};
use crate::session::ApiClient;
use crate::transport::Method;

/// Oldest server release the engine talks to.
pub const MINIMUM_VERSION: &str = "1.15";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteInfo {
    /// Raw generator string, e.g. `MediaWiki 1.35.0-wmf.3`.
    pub generator: String,
    /// Numeric part of the generator, e.g. `1.35.0`.
    pub version: String,
    /// Installed extension name → version (empty when unreported).
    pub extensions: BTreeMap<String, String>,
}

impl SiteInfo {
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.contains_key(name)
    }
}

pub(crate) fn probe_site(client: &ApiClient) -> Result<SiteInfo> {
    let params = Params::new()
        .with("action", "query")
        .with("meta", "siteinfo")
        .with("siprop", "general|extensions");
    let response = client.request(&params, Method::Get)?;
    if let Some(e) = ApiError::from_response(&response) {
        return Err(e.into());
    }

    let info = parse_site_info(&response)?;
    if !version_at_least(&info.version, MINIMUM_VERSION) {
        return Err(Error::UnsupportedVersion {
            found: info.version,
            minimum: MINIMUM_VERSION,
        });
    }
    debug!(version = %info.version, extensions = info.extensions.len(), "site probed");
    Ok(info)
}

fn parse_site_info(response: &Value) -> Result<SiteInfo> {
    let generator = response
        .pointer("/query/general/generator")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::UnexpectedResponse("siteinfo lacks query.general.generator".into()))?
        .to_string();

    let version: String = generator
        .trim_start_matches("MediaWiki ")
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .next()
        .unwrap_or_default()
        .to_string();

    let extensions = response
        .pointer("/query/extensions")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|ext| {
                    let name = codec::field(ext, "name").and_then(codec::text)?;
                    let version = codec::field(ext, "version")
                        .and_then(codec::text)
                        .unwrap_or_default();
                    Some((name, version))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(SiteInfo {
        generator,
        version,
        extensions,
    })
}

/// Compare dotted numeric versions component by component; missing
/// components count as zero.
fn version_at_least(found: &str, minimum: &str) -> bool {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| part.parse::<u64>().unwrap_or(0))
            .collect()
    };
    let (a, b) = (parse(found), parse(minimum));
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Greater => return true,
            Ordering::Less => return false,
            Ordering::Equal => {}
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_generator_and_extensions() {
        let info = parse_site_info(&json!({
            "query": {
                "general": {"generator": "MediaWiki 1.35.0-wmf.3"},
                "extensions": [
                    {"type": "parserhook", "name": "Cite", "version": "1.0"},
                    {"type": "other", "name": "AbuseFilter"}
                ]
            }
        }))
        .unwrap();
        assert_eq!(info.version, "1.35.0");
        assert_eq!(info.extensions["Cite"], "1.0");
        assert_eq!(info.extensions["AbuseFilter"], "");
        assert!(info.has_extension("AbuseFilter"));
    }

    #[test]
    fn missing_generator_is_unexpected() {
        let err = parse_site_info(&json!({"query": {}})).unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse(_)));
    }

    #[test]
    fn version_comparison() {
        assert!(version_at_least("1.15", "1.15"));
        assert!(version_at_least("1.15.1", "1.15"));
        assert!(version_at_least("1.100", "1.15"));
        assert!(version_at_least("2.0", "1.15"));
        assert!(!version_at_least("1.14.9", "1.15"));
        assert!(!version_at_least("1.9", "1.15"));
    }
}
