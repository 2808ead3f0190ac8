//! Wire format for the session configuration document described in §6:
//! an XML document, read by the lifecycle driver from stdin as
//! `<length>\n<bytes>`, describing one or more images.

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename = "config")]
pub struct SessionConfig {
    #[serde(rename = "image", default)]
    pub images: Vec<ImageConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    #[serde(rename = "@name")]
    pub name: String,
    pub origin: OriginConfig,
    pub size: u64,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OriginConfig {
    pub url: String,
    pub credentials: Option<Credentials>,
    pub offset: Option<u64>,
    /// If present and nonzero, the origin file is split across
    /// `<url>.0, <url>.1, …` (§3 "Segment").
    #[serde(rename = "segment-size")]
    pub segment_size: Option<u64>,
    #[serde(default)]
    pub cookies: Cookies,
    pub validators: Option<Validators>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Cookies {
    #[serde(rename = "cookie", default)]
    pub cookie: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Validators {
    pub etag: Option<String>,
    #[serde(rename = "last-modified")]
    pub last_modified: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub path: String,
    #[serde(rename = "chunk-size")]
    pub chunk_size: u64,
}

impl SessionConfig {
    pub fn parse_xml(xml: &str) -> Result<Self, crate::error::ConfigError> {
        quick_xml::de::from_str(xml).map_err(|err| crate::error::ConfigError::Xml(err.to_string()))
    }

    /// Renders the session configuration for the read-only `/config` file,
    /// replacing credentials and cookies with a fixed placeholder so that
    /// the mount namespace never leaks secrets (§4.9).
    pub fn censored_text(&self) -> String {
        let mut out = String::new();
        for image in &self.images {
            out.push_str(&format!("[{}]\n", image.name));
            out.push_str(&format!("url = {}\n", image.origin.url));
            if image.origin.credentials.is_some() {
                out.push_str("username = <censored>\n");
                out.push_str("password = <censored>\n");
            }
            if let Some(offset) = image.origin.offset {
                out.push_str(&format!("offset = {offset}\n"));
            }
            if let Some(segment_size) = image.origin.segment_size {
                out.push_str(&format!("segment-size = {segment_size}\n"));
            }
            if !image.origin.cookies.cookie.is_empty() {
                out.push_str(&format!(
                    "cookies = <censored, {} entries>\n",
                    image.origin.cookies.cookie.len()
                ));
            }
            if let Some(validators) = &image.origin.validators {
                if let Some(etag) = &validators.etag {
                    out.push_str(&format!("etag = {etag}\n"));
                }
                if let Some(last_modified) = validators.last_modified {
                    out.push_str(&format!("last-modified = {last_modified}\n"));
                }
            }
            out.push_str(&format!("size = {}\n", image.size));
            out.push_str(&format!("cache-path = {}\n", image.cache.path));
            out.push_str(&format!("chunk-size = {}\n", image.cache.chunk_size));
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_image() {
        let xml = r#"
            <config>
              <image name="disk">
                <origin>
                  <url>https://example.com/disk.raw</url>
                </origin>
                <size>1048576</size>
                <cache>
                  <path>/var/cache/vmnetfs/disk</path>
                  <chunk-size>131072</chunk-size>
                </cache>
              </image>
            </config>
        "#;
        let config = SessionConfig::parse_xml(xml).unwrap();
        assert_eq!(config.images.len(), 1);
        let image = &config.images[0];
        assert_eq!(image.name, "disk");
        assert_eq!(image.origin.url, "https://example.com/disk.raw");
        assert_eq!(image.size, 1_048_576);
        assert_eq!(image.cache.chunk_size, 131_072);
        assert!(image.origin.credentials.is_none());
    }

    #[test]
    fn censors_credentials_and_cookies() {
        let xml = r#"
            <config>
              <image name="disk">
                <origin>
                  <url>https://example.com/disk.raw</url>
                  <credentials>
                    <username>alice</username>
                    <password>hunter2</password>
                  </credentials>
                  <cookies>
                    <cookie>session=abc</cookie>
                  </cookies>
                </origin>
                <size>100</size>
                <cache>
                  <path>/tmp/cache</path>
                  <chunk-size>65536</chunk-size>
                </cache>
              </image>
            </config>
        "#;
        let config = SessionConfig::parse_xml(xml).unwrap();
        let text = config.censored_text();
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("alice"));
        assert!(!text.contains("session=abc"));
        assert!(text.contains("<censored>"));
    }
}
