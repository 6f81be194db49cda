//! Delivery adapter — pushes one payload to one subscriber.
//!
//! Encryption (aes128gcm, RFC 8291) and VAPID signing (RFC 8292) come from the
//! `web-push` crate; the resulting request is sent with `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use web_push::{
    ContentEncoding, SubscriptionInfo, VapidSignature, VapidSignatureBuilder, WebPushError,
    WebPushMessageBuilder,
};

use pushcast_common::config::{BroadcastConfig, VapidConfig};
use pushcast_common::types::SubscriptionKeys;

/// Push service bodies quoted in failure details are cut to this many bytes.
const MAX_DETAIL_BODY: usize = 200;

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    /// Accepted by the push service.
    Delivered,
    /// The endpoint is gone (404 / 410) and will never accept messages again.
    PermanentFailure { code: u16 },
    /// Anything else: network errors, throttling, bad payloads, bad keys.
    TransientFailure { detail: String },
}

impl DeliveryResult {
    pub fn transient(detail: impl Into<String>) -> Self {
        DeliveryResult::TransientFailure {
            detail: detail.into(),
        }
    }

    /// Map a push service response status onto a result.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            200..=299 => DeliveryResult::Delivered,
            404 | 410 => DeliveryResult::PermanentFailure { code: status },
            _ => {
                let body = body.trim();
                if body.is_empty() {
                    Self::transient(format!("push service responded {}", status))
                } else {
                    let mut end = body.len().min(MAX_DETAIL_BODY);
                    while !body.is_char_boundary(end) {
                        end -= 1;
                    }
                    Self::transient(format!(
                        "push service responded {}: {}",
                        status,
                        &body[..end]
                    ))
                }
            }
        }
    }
}

/// Capability to deliver an opaque payload to one push endpoint.
#[async_trait]
pub trait DeliveryAdapter: Send + Sync {
    async fn deliver(
        &self,
        endpoint: &str,
        keys: &SubscriptionKeys,
        payload: &[u8],
    ) -> DeliveryResult;
}

/// Web Push delivery over HTTPS.
pub struct WebPushDelivery {
    client: reqwest::Client,
    vapid: VapidConfig,
    ttl_seconds: u32,
}

impl WebPushDelivery {
    pub fn new(vapid: VapidConfig, settings: &BroadcastConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.delivery_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            vapid,
            ttl_seconds: settings.ttl_seconds,
        })
    }

    /// Encrypt and sign one push, ready to hand to the HTTP client.
    fn prepare(
        &self,
        endpoint: &str,
        keys: &SubscriptionKeys,
        payload: &[u8],
    ) -> Result<PushRequest, WebPushError> {
        let info = SubscriptionInfo::new(endpoint, keys.p256dh.as_str(), keys.auth.as_str());

        let mut signer = VapidSignatureBuilder::from_base64(
            &self.vapid.private_key,
            web_push::URL_SAFE_NO_PAD,
            &info,
        )?;
        signer.add_claim("sub", self.vapid.subject.as_str());
        let signature = signer.build()?;

        let mut builder = WebPushMessageBuilder::new(&info);
        builder.set_ttl(self.ttl_seconds);
        // web-push only attaches VAPID headers while encrypting a payload
        let authorization = if payload.is_empty() {
            Some(vapid_authorization(&signature))
        } else {
            builder.set_payload(ContentEncoding::Aes128Gcm, payload);
            builder.set_vapid_signature(signature);
            None
        };

        let (parts, body) =
            web_push::request_builder::build_request::<Vec<u8>>(builder.build()?).into_parts();

        let mut headers: Vec<(String, Vec<u8>)> = parts
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();
        if let Some(authorization) = authorization {
            headers.push(("authorization".to_string(), authorization.into_bytes()));
        }

        Ok(PushRequest {
            uri: parts.uri.to_string(),
            headers,
            body,
        })
    }
}

/// A fully prepared push service request.
struct PushRequest {
    uri: String,
    headers: Vec<(String, Vec<u8>)>,
    body: Vec<u8>,
}

#[cfg(test)]
impl PushRequest {
    fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }
}

fn vapid_authorization(signature: &VapidSignature) -> String {
    format!(
        "vapid t={}, k={}",
        signature.auth_t,
        URL_SAFE_NO_PAD.encode(&signature.auth_k)
    )
}

#[async_trait]
impl DeliveryAdapter for WebPushDelivery {
    async fn deliver(
        &self,
        endpoint: &str,
        keys: &SubscriptionKeys,
        payload: &[u8],
    ) -> DeliveryResult {
        let prepared = match self.prepare(endpoint, keys, payload) {
            Ok(prepared) => prepared,
            Err(e) => return DeliveryResult::transient(format!("failed to build message: {}", e)),
        };

        let mut request = self.client.post(prepared.uri).body(prepared.body);
        for (name, value) in prepared.headers {
            request = request.header(name, value);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return DeliveryResult::transient("delivery timed out"),
            Err(e) => return DeliveryResult::transient(format!("request failed: {}", e)),
        };

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        DeliveryResult::from_status(status, &body)
    }
}
