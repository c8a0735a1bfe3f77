use anyhow::Context;
use async_trait::async_trait;
use web_push::{
    ContentEncoding, IsahcWebPushClient, PartialVapidSignatureBuilder, SubscriptionInfo,
    VapidSignatureBuilder, WebPushClient, WebPushError, WebPushMessageBuilder,
};

use crate::models::Subscription;

/// How long the push service should hold an undelivered notification, in seconds.
const MESSAGE_TTL: u32 = 12 * 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The push service no longer knows the endpoint (HTTP 404/410).
    #[error("push endpoint is gone")]
    Gone,
    #[error("push delivery failed: {0}")]
    Transient(String),
}

#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    async fn send(&self, subscription: &Subscription, payload: &[u8]) -> Result<(), DeliveryError>;
}

/// VAPID-signed Web Push delivery.
pub struct WebPushTransport {
    client: IsahcWebPushClient,
    signer: PartialVapidSignatureBuilder,
    subject: String,
}

impl WebPushTransport {
    /// `private_key` is the URL-safe base64 VAPID key; `subject` a `mailto:` or `https:` contact.
    pub fn new(private_key: &str, subject: &str) -> anyhow::Result<Self> {
        let signer = VapidSignatureBuilder::from_base64_no_sub(private_key, web_push::URL_SAFE_NO_PAD)
            .context("invalid VAPID private key")?;
        let client = IsahcWebPushClient::new().context("failed to build push client")?;
        Ok(Self {
            client,
            signer,
            subject: subject.to_string(),
        })
    }
}

fn classify(err: WebPushError) -> DeliveryError {
    match err {
        WebPushError::EndpointNotValid | WebPushError::EndpointNotFound => DeliveryError::Gone,
        other => DeliveryError::Transient(other.to_string()),
    }
}

#[async_trait]
impl PushTransport for WebPushTransport {
    async fn send(&self, subscription: &Subscription, payload: &[u8]) -> Result<(), DeliveryError> {
        let info = SubscriptionInfo::new(
            &subscription.endpoint,
            &subscription.keys.p256dh,
            &subscription.keys.auth,
        );

        let mut signature = self.signer.clone().add_sub_info(&info);
        signature.add_claim("sub", self.subject.as_str());
        let signature = signature.build().map_err(classify)?;

        let mut builder = WebPushMessageBuilder::new(&info);
        builder.set_payload(ContentEncoding::Aes128Gcm, payload);
        builder.set_vapid_signature(signature);
        builder.set_ttl(MESSAGE_TTL);
        let message = builder.build().map_err(classify)?;

        self.client.send(message).await.map_err(classify)
    }
}
