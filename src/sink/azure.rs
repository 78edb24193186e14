//! Blob service connection strings and the HTTP block-blob sink.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// `x-ms-version` sent with every request.
pub const STORAGE_API_VERSION: &str = "2021-08-06";

type HmacSha256 = Hmac<Sha256>;

/// How requests to the blob service are authorized.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Query string appended to every blob url.
    SharedAccessSignature(String),
    /// Account name plus the decoded account key, signed per request.
    SharedKey { account: String, key: Vec<u8> },
}

/// The parts of a storage connection string the HTTP sink needs.
///
/// Accepts `BlobEndpoint=...`, or the account form (`DefaultEndpointsProtocol`,
/// `AccountName`, `EndpointSuffix`), together with either a
/// `SharedAccessSignature` or an `AccountKey`. A signature wins when both are
/// present.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub blob_endpoint: String,
    pub credential: Credential,
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut blob_endpoint = None;
        let mut sas = None;
        let mut protocol = None;
        let mut account = None;
        let mut account_key = None;
        let mut suffix = None;

        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed connection string segment '{}'", part))?;
            let value = value.trim();
            match key.trim() {
                "BlobEndpoint" => blob_endpoint = Some(value.to_string()),
                "SharedAccessSignature" => {
                    sas = Some(value.trim_start_matches('?').to_string())
                }
                "DefaultEndpointsProtocol" => protocol = Some(value.to_string()),
                "AccountName" => account = Some(value.to_string()),
                "AccountKey" => account_key = Some(value.to_string()),
                "EndpointSuffix" => suffix = Some(value.to_string()),
                _ => {}
            }
        }

        let blob_endpoint = match (blob_endpoint, account.as_deref()) {
            (Some(endpoint), _) => endpoint,
            (None, Some(account)) => format!(
                "{}://{}.blob.{}",
                protocol.as_deref().unwrap_or("https"),
                account,
                suffix.as_deref().unwrap_or("core.windows.net")
            ),
            (None, None) => {
                return Err(anyhow!(
                    "connection string needs BlobEndpoint or AccountName"
                ))
            }
        };
        if !blob_endpoint.starts_with("http://") && !blob_endpoint.starts_with("https://") {
            return Err(anyhow!("blob endpoint must be an http(s) url"));
        }

        let credential = match (sas.filter(|s| !s.is_empty()), account_key) {
            (Some(sas), _) => Credential::SharedAccessSignature(sas),
            (None, Some(encoded)) => {
                let account = account
                    .filter(|a| !a.is_empty())
                    .ok_or_else(|| anyhow!("AccountKey requires AccountName"))?;
                let key = STANDARD
                    .decode(encoded.as_bytes())
                    .context("AccountKey is not valid base64")?;
                if key.is_empty() {
                    return Err(anyhow!("AccountKey is empty"));
                }
                Credential::SharedKey { account, key }
            }
            (None, None) => {
                return Err(anyhow!(
                    "connection string needs a SharedAccessSignature or AccountKey"
                ))
            }
        };

        Ok(Self {
            blob_endpoint: blob_endpoint.trim_end_matches('/').to_string(),
            credential,
        })
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::SharedAccessSignature(_) => f.write_str("SharedAccessSignature(<redacted>)"),
            Credential::SharedKey { account, .. } => f
                .debug_struct("SharedKey")
                .field("account", account)
                .field("key", &"<redacted>")
                .finish(),
        }
    }
}

impl std::fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let credential = match &self.credential {
            Credential::SharedAccessSignature(_) => "sas <redacted>".to_string(),
            Credential::SharedKey { account, .. } => format!("shared key {} <redacted>", account),
        };
        f.debug_struct("ConnectionString")
            .field("blob_endpoint", &self.blob_endpoint)
            .field("credential", &credential)
            .finish()
    }
}

/// String-to-sign for a block-blob `PUT` under Shared Key authorization.
///
/// `path` is the percent-encoded url path (`/<container>/<blob>`). The only
/// canonicalized headers are the three `x-ms-*` headers the sink sends.
#[cfg_attr(not(feature = "sink-http"), allow(dead_code))]
pub(crate) fn put_blob_string_to_sign(
    account: &str,
    path: &str,
    content_length: usize,
    content_type: &str,
    ms_date: &str,
) -> String {
    // Content-Length is left blank for empty bodies.
    let length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };
    format!(
        "PUT\n\n\n{length}\n\n{content_type}\n\n\n\n\n\n\n\
         x-ms-blob-type:BlockBlob\nx-ms-date:{ms_date}\nx-ms-version:{STORAGE_API_VERSION}\n\
         /{account}{path}"
    )
}

/// Base64 HMAC-SHA256 of `string_to_sign` under the decoded account key.
#[cfg_attr(not(feature = "sink-http"), allow(dead_code))]
pub(crate) fn shared_key_signature(key: &[u8], string_to_sign: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|err| anyhow!("invalid account key: {}", err))?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

#[cfg(feature = "sink-http")]
pub use http::HttpBlobSink;

#[cfg(feature = "sink-http")]
mod http {
    use anyhow::{anyhow, Context, Result};
    use url::Url;

    use super::{
        put_blob_string_to_sign, shared_key_signature, ConnectionString, Credential,
        STORAGE_API_VERSION,
    };
    use crate::sink::BlobSink;

    const JPEG_CONTENT_TYPE: &str = "image/jpeg";

    /// Uploads block blobs with a single authenticated `PUT`.
    pub struct HttpBlobSink {
        connection: ConnectionString,
        container: String,
        agent: ureq::Agent,
    }

    impl HttpBlobSink {
        pub fn new(connection: ConnectionString, container: &str) -> Self {
            Self {
                connection,
                container: container.to_string(),
                agent: ureq::AgentBuilder::new()
                    .timeout(std::time::Duration::from_secs(30))
                    .build(),
            }
        }

        pub(crate) fn blob_url(&self, blob_name: &str) -> Result<Url> {
            let mut url = Url::parse(&self.connection.blob_endpoint)
                .context("parse blob endpoint")?;
            {
                let mut segments = url
                    .path_segments_mut()
                    .map_err(|_| anyhow!("blob endpoint cannot be a base url"))?;
                segments.pop_if_empty().push(&self.container);
                for segment in blob_name.split('/') {
                    segments.push(segment);
                }
            }
            if let Credential::SharedAccessSignature(sas) = &self.connection.credential {
                url.set_query(Some(sas));
            }
            Ok(url)
        }
    }

    impl BlobSink for HttpBlobSink {
        fn name(&self) -> &'static str {
            "http"
        }

        fn container(&self) -> &str {
            &self.container
        }

        fn upload(&mut self, blob_name: &str, bytes: &[u8]) -> Result<()> {
            let url = self.blob_url(blob_name)?;
            let mut request = self
                .agent
                .put(url.as_str())
                .set("x-ms-blob-type", "BlockBlob")
                .set("x-ms-version", STORAGE_API_VERSION)
                .set("Content-Type", JPEG_CONTENT_TYPE);
            if let Credential::SharedKey { account, key } = &self.connection.credential {
                let ms_date = chrono::Utc::now()
                    .format("%a, %d %b %Y %H:%M:%S GMT")
                    .to_string();
                let string_to_sign = put_blob_string_to_sign(
                    account,
                    url.path(),
                    bytes.len(),
                    JPEG_CONTENT_TYPE,
                    &ms_date,
                );
                let signature = shared_key_signature(key, &string_to_sign)?;
                request = request
                    .set("x-ms-date", &ms_date)
                    .set("Authorization", &format!("SharedKey {}:{}", account, signature));
            }
            let response = request.send_bytes(bytes);
            match response {
                Ok(_) => Ok(()),
                Err(ureq::Error::Status(code, response)) => Err(anyhow!(
                    "blob service rejected upload with {} {}",
                    code,
                    response.status_text()
                )),
                Err(err) => Err(anyhow::Error::new(err).context("blob upload failed")),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn blob_url_includes_container_path_and_sas() -> Result<()> {
            let connection = ConnectionString::parse(
                "BlobEndpoint=https://acct.blob.core.windows.net/;SharedAccessSignature=sv=1&sig=a%2Bb",
            )?;
            let sink = HttpBlobSink::new(connection, "accessmonitorblob");
            let url = sink.blob_url("camera_01/a b.jpg")?;
            assert_eq!(
                url.as_str(),
                "https://acct.blob.core.windows.net/accessmonitorblob/camera_01/a%20b.jpg?sv=1&sig=a%2Bb"
            );
            Ok(())
        }

        #[test]
        fn shared_key_blob_url_has_no_query() -> Result<()> {
            let connection = ConnectionString::parse(
                "DefaultEndpointsProtocol=https;AccountName=cams;AccountKey=c2VjcmV0;EndpointSuffix=core.windows.net",
            )?;
            let sink = HttpBlobSink::new(connection, "accessmonitorblob");
            let url = sink.blob_url("camera_01/a b.jpg")?;
            assert_eq!(url.query(), None);
            assert_eq!(url.path(), "/accessmonitorblob/camera_01/a%20b.jpg");
            Ok(())
        }
    }
}
