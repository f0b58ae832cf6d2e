//! Gateway requests as described by ERC-3668.

use std::time::Duration;

use async_trait::async_trait;
use ethers::types::{Address, Bytes};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{instrument, trace};

use crate::{signal::UNANSWERED, FetchError, OffchainFetcher};

const DATA_PLACEHOLDER: &str = "{data}";
const SENDER_PLACEHOLDER: &str = "{sender}";

/// Body of a POST gateway request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct OffchainRequestBody {
    /// Lowercase `0x` prefixed sender address
    pub sender: String,
    /// `0x` prefixed request data
    pub data: String,
}

/// A gateway request with its URL template already filled in.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OffchainRequest {
    /// The template carried `{data}`, so everything is in the URL.
    Get {
        /// Interpolated URL
        url: String,
    },
    /// The template had no `{data}`; the request goes in a JSON body.
    Post {
        /// Interpolated URL
        url: String,
        /// JSON body
        body: OffchainRequestBody,
    },
}

#[derive(Deserialize)]
struct OffchainResponse {
    data: String,
}

fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Build the request for one URL template.
pub fn build_request(url_template: &str, sender: Address, call_data: &[u8]) -> OffchainRequest {
    // `Display` for `Address` elides the middle of the address, so format
    // the bytes directly.
    let sender = to_hex(sender.as_bytes());
    let data = to_hex(call_data);
    let url = url_template
        .replace(DATA_PLACEHOLDER, &data)
        .replace(SENDER_PLACEHOLDER, &sender);
    if url_template.contains(DATA_PLACEHOLDER) {
        OffchainRequest::Get { url }
    } else {
        OffchainRequest::Post {
            url,
            body: OffchainRequestBody { sender, data },
        }
    }
}

/// Decode a gateway response body into the bytes handed to the callback.
pub fn parse_response(body: &[u8]) -> Result<Bytes, FetchError> {
    let response: OffchainResponse = serde_json::from_slice(body)?;
    let hex_data = response
        .data
        .strip_prefix("0x")
        .ok_or_else(|| FetchError::MissingHexPrefix(response.data.clone()))?;
    let data = hex::decode(hex_data)?;
    if data == UNANSWERED.as_slice() {
        return Err(FetchError::Unanswered);
    }
    Ok(data.into())
}

/// [`OffchainFetcher`] that talks to gateways over HTTP.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Build a fetcher whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client))
    }

    /// Use an existing client, e.g. one with custom headers or proxies.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::with_client(Client::new())
    }
}

#[async_trait]
impl OffchainFetcher for HttpFetcher {
    #[instrument(skip(self, url_template, call_data), fields(url = %url_template))]
    async fn fetch(
        &self,
        url_template: &str,
        sender: Address,
        call_data: &Bytes,
    ) -> Result<Bytes, FetchError> {
        let request = build_request(url_template, sender, call_data);
        trace!(?request, "Sending gateway request");
        let response = match request {
            OffchainRequest::Get { url } => self.client.get(url).send().await?,
            OffchainRequest::Post { url, body } => {
                self.client.post(url).json(&body).send().await?
            }
        };
        // The status code is ignored; only the body shape matters.
        let body = response.bytes().await?;
        parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn sender() -> Address {
        Address::from_str("0xc66ab83418c20a65c3f8e83b3d11c8c3a6097b6f").unwrap()
    }

    #[test]
    fn get_when_template_has_data() {
        let request = build_request(
            "https://gw.example/{sender}/{data}.json",
            sender(),
            &[0x12, 0x34],
        );
        assert_eq!(
            request,
            OffchainRequest::Get {
                url: "https://gw.example/0xc66ab83418c20a65c3f8e83b3d11c8c3a6097b6f/0x1234.json"
                    .to_owned()
            }
        );
    }

    #[test]
    fn post_when_template_has_no_data() {
        let request = build_request("https://gw.example/{sender}", sender(), &[0xab]);
        let expected_sender = "0xc66ab83418c20a65c3f8e83b3d11c8c3a6097b6f".to_owned();
        assert_eq!(
            request,
            OffchainRequest::Post {
                url: format!("https://gw.example/{expected_sender}"),
                body: OffchainRequestBody {
                    sender: expected_sender,
                    data: "0xab".to_owned(),
                },
            }
        );
    }

    #[test]
    fn empty_call_data_is_0x() {
        let request = build_request("https://gw.example/{data}", sender(), &[]);
        assert_eq!(
            request,
            OffchainRequest::Get {
                url: "https://gw.example/0x".to_owned()
            }
        );
    }

    #[test]
    fn post_body_serializes_as_json() {
        let body = OffchainRequestBody {
            sender: "0x01".to_owned(),
            data: "0x02".to_owned(),
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"sender":"0x01","data":"0x02"}"#
        );
    }

    #[test]
    fn parses_valid_response() {
        let data = parse_response(br#"{"data":"0xdeadbeef"}"#).unwrap();
        assert_eq!(data, Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(parse_response(br#"{"data":"0x"}"#).unwrap(), Bytes::new());
    }

    #[test]
    fn rejects_bad_responses() {
        assert!(matches!(
            parse_response(b"not json"),
            Err(FetchError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_response(br#"{"result":"0x00"}"#),
            Err(FetchError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_response(br#"{"data":"deadbeef"}"#),
            Err(FetchError::MissingHexPrefix(_))
        ));
        assert!(matches!(
            parse_response(br#"{"data":"0x12345"}"#),
            Err(FetchError::InvalidHex(_))
        ));
    }

    #[test]
    fn rejects_forged_unanswered() {
        let body = format!(r#"{{"data":"0x{}"}}"#, hex::encode(*UNANSWERED));
        assert!(matches!(
            parse_response(body.as_bytes()),
            Err(FetchError::Unanswered)
        ));
    }
}
