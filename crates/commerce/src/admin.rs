use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use volja_core::metadata::Metadata;
use volja_core::projection::{OrderProjection, ShipmentProjection};

/// Fields requested when projecting an order for the invoice and email.
pub const ORDER_FIELDS: &str = "id,display_id,email,currency_code,created_at,total,shipping_total,\
*customer,*shipping_address,*items";

/// Fields requested when projecting a fulfillment for the shipment email.
pub const FULFILLMENT_FIELDS: &str = "id,order_id,created_at,*labels,*delivery_address,\
*order,*order.customer";

/// Client for the commerce backend's admin REST API.
#[derive(Clone)]
pub struct CommerceClient {
    http: Client,
    base_url: Url,
    api_token: String,
}

impl CommerceClient {
    pub fn new(api_token: impl Into<String>, base_url: Url, http: Client) -> Self {
        Self {
            http,
            base_url,
            api_token: api_token.into(),
        }
    }

    pub async fn get_product(&self, product_id: &str) -> Result<ProductResource, CommerceError> {
        let mut url = self.endpoint(&["admin", "products", product_id])?;
        url.query_pairs_mut().append_pair("fields", "id,title,metadata");
        let response = self.authorized_request(Method::GET, url).send().await?;
        parse_json::<ProductEnvelope>(response)
            .await
            .map(|envelope| envelope.product)
    }

    /// Replaces the product metadata with `metadata`. Callers merge first.
    pub async fn update_product_metadata(
        &self,
        product_id: &str,
        metadata: &Metadata,
    ) -> Result<ProductResource, CommerceError> {
        let url = self.endpoint(&["admin", "products", product_id])?;
        let response = self
            .authorized_request(Method::POST, url)
            .json(&MetadataBody { metadata })
            .send()
            .await?;
        parse_json::<ProductEnvelope>(response)
            .await
            .map(|envelope| envelope.product)
    }

    pub async fn get_variant(
        &self,
        product_id: &str,
        variant_id: &str,
    ) -> Result<VariantResource, CommerceError> {
        let url = self.endpoint(&["admin", "products", product_id, "variants", variant_id])?;
        let response = self.authorized_request(Method::GET, url).send().await?;
        parse_json::<VariantEnvelope>(response)
            .await
            .map(|envelope| envelope.variant)
    }

    /// Replaces the variant metadata with `metadata`. The response wraps the
    /// parent product, so only success is reported.
    pub async fn update_variant_metadata(
        &self,
        product_id: &str,
        variant_id: &str,
        metadata: &Metadata,
    ) -> Result<(), CommerceError> {
        let url = self.endpoint(&["admin", "products", product_id, "variants", variant_id])?;
        let response = self
            .authorized_request(Method::POST, url)
            .json(&MetadataBody { metadata })
            .send()
            .await?;
        ensure_success(response).await
    }

    pub async fn get_order(&self, order_id: &str) -> Result<OrderProjection, CommerceError> {
        let mut url = self.endpoint(&["admin", "orders", order_id])?;
        url.query_pairs_mut().append_pair("fields", ORDER_FIELDS);
        let response = self.authorized_request(Method::GET, url).send().await?;
        parse_json::<OrderEnvelope>(response)
            .await
            .map(|envelope| envelope.order)
    }

    pub async fn get_fulfillment(
        &self,
        fulfillment_id: &str,
    ) -> Result<ShipmentProjection, CommerceError> {
        let mut url = self.endpoint(&["admin", "fulfillments", fulfillment_id])?;
        url.query_pairs_mut().append_pair("fields", FULFILLMENT_FIELDS);
        let response = self.authorized_request(Method::GET, url).send().await?;
        parse_json::<FulfillmentEnvelope>(response)
            .await
            .map(|envelope| envelope.fulfillment)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, CommerceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CommerceError::BaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized_request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.api_token))
    }
}

/// Product fields used by the admin widgets.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProductResource {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VariantResource {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

#[derive(Serialize)]
struct MetadataBody<'a> {
    metadata: &'a Metadata,
}

#[derive(Deserialize)]
struct ProductEnvelope {
    product: ProductResource,
}

#[derive(Deserialize)]
struct VariantEnvelope {
    variant: VariantResource,
}

#[derive(Deserialize)]
struct OrderEnvelope {
    order: OrderProjection,
}

#[derive(Deserialize)]
struct FulfillmentEnvelope {
    fulfillment: ShipmentProjection,
}

/// Errors produced by the commerce client.
#[derive(Debug, Error)]
pub enum CommerceError {
    #[error("base url cannot carry a path: {0}")]
    BaseUrl(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl CommerceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CommerceError::Status { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

async fn ensure_success(response: Response) -> Result<(), CommerceError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(CommerceError::Status { status, body });
    }
    Ok(())
}

async fn parse_json<T>(response: Response) -> Result<T, CommerceError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(CommerceError::Status { status, body });
    }

    Ok(response.json().await?)
}
