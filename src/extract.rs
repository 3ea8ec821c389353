//! Vision extraction of structured receipt data.
//!
//! The wizard only consumes the typed result; the model call itself lives
//! behind `ReceiptExtractor` so tests can swap in a canned implementation.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::receipt::Receipt;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const STATUS_URL: &str = "https://status.anthropic.com/";
const PROMPT: &str = "What shop and items info is in this image of a supermarket receipt?";
const TOOL_NAME: &str = "record_receipt";

#[async_trait]
pub trait ReceiptExtractor: Send + Sync {
    /// Extract structured data from a base64-encoded JPEG.
    async fn extract(&self, image_b64: &str) -> anyhow::Result<Receipt>;
}

/// Log-only reachability probe before extracting.
pub async fn probe_connectivity(http: &reqwest::Client) -> bool {
    match http
        .get(STATUS_URL)
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(res) => {
            info!(status = %res.status(), "anthropic status page probe");
            res.status().is_success()
        }
        Err(e) => {
            info!(error = %e, "anthropic status page unreachable");
            false
        }
    }
}

pub struct AnthropicExtractor {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    max_retries: u32,
}

impl AnthropicExtractor {
    pub fn new(api_key: String, model: String, max_tokens: u32, max_retries: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            max_tokens,
            max_retries: max_retries.max(1),
        }
    }

    fn request_body(&self, image_b64: &str) -> Value {
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "tools": [receipt_tool()],
            "tool_choice": {"type": "tool", "name": TOOL_NAME},
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": PROMPT},
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": "image/jpeg",
                            "data": image_b64,
                        },
                    },
                ],
            }],
        })
    }

    async fn request_once(&self, image_b64: &str) -> anyhow::Result<Receipt> {
        debug!(model = %self.model, "making an anthropic api request");
        let response: Value = self
            .http
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&self.request_body(image_b64))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        receipt_from_response(&response)
    }
}

#[async_trait]
impl ReceiptExtractor for AnthropicExtractor {
    async fn extract(&self, image_b64: &str) -> anyhow::Result<Receipt> {
        probe_connectivity(&self.http).await;

        let mut last_error = anyhow::anyhow!("no extraction attempt was made");
        for attempt in 1..=self.max_retries {
            match self.request_once(image_b64).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) => {
                    warn!(attempt, max = self.max_retries, error = %e, "extraction attempt failed");
                    last_error = e;
                }
            }
        }
        Err(last_error.context("receipt extraction exhausted its retries"))
    }
}

/// Pull the forced tool call's input out of a messages-API response.
fn receipt_from_response(response: &Value) -> anyhow::Result<Receipt> {
    let blocks = response
        .get("content")
        .and_then(Value::as_array)
        .context("response has no content blocks")?;
    let input = blocks
        .iter()
        .find(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"))
        .and_then(|block| block.get("input"))
        .context("response has no tool_use block")?;
    serde_json::from_value(input.clone()).context("tool input did not match the receipt schema")
}

fn receipt_tool() -> Value {
    json!({
        "name": TOOL_NAME,
        "description": "Record the shop and item info read from a supermarket receipt.",
        "input_schema": {
            "type": "object",
            "required": ["shop", "items"],
            "properties": {
                "shop": {
                    "type": "object",
                    "required": ["name", "date_str", "time_str", "total"],
                    "properties": {
                        "name": {
                            "type": "string",
                            "description": "Name of the shop, e.g. Edeka, Rewe, Aldi, Lidl, Netto, dm.",
                        },
                        "date_str": {
                            "type": "string",
                            "description": "Date of the purchase, e.g. 2021-05-13 or 13.5.2021.",
                        },
                        "time_str": {
                            "type": "string",
                            "description": "Time of the purchase, e.g. 16:46 or 16:46:47.",
                        },
                        "total": {
                            "type": "number",
                            "description": "Total amount of the purchase in Euros.",
                        },
                    },
                },
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["name", "price"],
                        "properties": {
                            "name": {
                                "type": "string",
                                "description": "Name of the item as printed (in German).",
                            },
                            "price": {
                                "type": "number",
                                "description": "Price of the item in Euros.",
                            },
                            "count": {
                                "type": ["integer", "null"],
                                "description": "Number of items purchased, usually printed only for multiples.",
                            },
                            "mass": {
                                "type": ["number", "null"],
                                "description": "Mass in kilograms, usually printed only for items sold by weight.",
                            },
                            "tax": {
                                "type": ["string", "null"],
                                "description": "Tax symbol at the end of the line, chain specific, e.g. A, B, 7%.",
                            },
                            "category": {
                                "type": ["string", "null"],
                                "description": "Likely grocery category given the item name.",
                            },
                        },
                    },
                },
            },
        },
    })
}

/// Fixed-result extractor for tests and offline runs.
pub struct CannedExtractor {
    receipt: Receipt,
}

impl CannedExtractor {
    pub fn new(receipt: Receipt) -> Self {
        Self { receipt }
    }
}

#[async_trait]
impl ReceiptExtractor for CannedExtractor {
    async fn extract(&self, _image_b64: &str) -> anyhow::Result<Receipt> {
        Ok(self.receipt.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_tool_use_block() {
        let response = json!({
            "content": [
                {"type": "text", "text": "Reading the receipt."},
                {
                    "type": "tool_use",
                    "name": TOOL_NAME,
                    "input": {
                        "shop": {
                            "name": "Edeka",
                            "date_str": "2021-05-13",
                            "time_str": "16:46",
                            "total": 12.34,
                        },
                        "items": [
                            {"name": "G&G Tomatens.1l", "price": 1.11},
                        ],
                    },
                },
            ],
        });
        let receipt = receipt_from_response(&response).expect("should parse");
        assert_eq!(receipt.shop.name, "Edeka");
        assert_eq!(receipt.items.len(), 1);
        assert_eq!(receipt.items[0].count, Some(1));
    }

    #[test]
    fn missing_tool_use_block_is_an_error() {
        let response = json!({"content": [{"type": "text", "text": "no tools here"}]});
        assert!(receipt_from_response(&response).is_err());
    }

    #[test]
    fn empty_response_is_an_error() {
        assert!(receipt_from_response(&json!({})).is_err());
    }
}
