//! `/admin/widgets/*`: read and save the metadata keys owned by each admin
//! widget. Every save fetches the entity first and merges into that copy.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use volja_commerce::{CommerceError, ProductResource};
use volja_core::metadata::{
    format_preorder_display, merge_patch, read_colors, read_coming_soon, read_pre_order_date,
    read_pre_order_instant, read_product_state, read_size_chart, read_variant_color, HexColor, Metadata, MetadataPatch,
    PreorderDatePatch, ProductSettingsPatch, ProductState, ProductStatePatch, SizeChartPatch,
    SwatchColorsPatch, VariantColorPatch,
};
use volja_core::size_chart::{SizeChart, SizeChartEdit};

use crate::problem::ProblemResponse;
use crate::router::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/widgets/products/:id/settings",
            get(get_settings).put(put_settings),
        )
        .route(
            "/widgets/products/:id/preorder-date",
            get(get_preorder_date).put(put_preorder_date),
        )
        .route(
            "/widgets/products/:id/size-chart",
            get(get_size_chart)
                .put(put_size_chart)
                .patch(patch_size_chart),
        )
        .route(
            "/widgets/products/:id/colors",
            get(get_colors).put(put_colors),
        )
        .route(
            "/widgets/products/:id/state",
            get(get_product_state).put(put_product_state),
        )
        .route(
            "/widgets/products/:id/variants/:variant_id/color",
            get(get_variant_color).put(put_variant_color),
        )
}

/// Same shape as [`ProductSettingsPatch`] so a read can be saved back as is.
#[derive(Debug, Serialize)]
pub struct SettingsView {
    product_id: String,
    coming_soon: bool,
    pre_order_date: Option<DateTime<Utc>>,
}

impl SettingsView {
    fn from_product(product: &ProductResource, tz: &Tz) -> Self {
        let metadata = product.metadata.as_ref();
        Self {
            product_id: product.id.clone(),
            coming_soon: read_coming_soon(metadata),
            pre_order_date: read_pre_order_instant(metadata, tz),
        }
    }
}

/// Pre-order date as wall-clock time in the store time zone.
#[derive(Debug, Serialize)]
pub struct PreorderDateView {
    product_id: String,
    pre_order_date: Option<NaiveDateTime>,
    display: String,
}

impl PreorderDateView {
    fn from_product(product: &ProductResource, tz: &Tz) -> Self {
        let date = read_pre_order_date(product.metadata.as_ref(), tz);
        Self {
            product_id: product.id.clone(),
            pre_order_date: date,
            display: format_preorder_display(date),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SizeChartView {
    product_id: String,
    has_chart: bool,
    chart: SizeChart,
    draft: SizeChart,
}

impl SizeChartView {
    fn from_product(product: &ProductResource) -> Self {
        let chart = read_size_chart(product.metadata.as_ref());
        Self {
            product_id: product.id.clone(),
            has_chart: chart.has_chart(),
            draft: SizeChart::draft_from_saved(&chart),
            chart,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SizeChartEdits {
    edits: Vec<SizeChartEdit>,
}

#[derive(Debug, Serialize)]
pub struct ColorsView {
    product_id: String,
    colors: Vec<HexColor>,
}

impl ColorsView {
    fn from_product(product: &ProductResource) -> Self {
        Self {
            product_id: product.id.clone(),
            colors: read_colors(product.metadata.as_ref()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProductStateView {
    product_id: String,
    #[serde(flatten)]
    state: ProductState,
}

impl ProductStateView {
    fn from_product(product: &ProductResource) -> Self {
        Self {
            product_id: product.id.clone(),
            state: read_product_state(product.metadata.as_ref()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VariantColorView {
    product_id: String,
    variant_id: String,
    color: String,
}

async fn get_settings(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Result<Json<SettingsView>, ProblemResponse> {
    let product = fetch_product(&state, &product_id).await?;
    let view = SettingsView::from_product(&product, &state.timezone());
    Ok(Json(view))
}

async fn put_settings(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    payload: Result<Json<ProductSettingsPatch>, JsonRejection>,
) -> Result<Json<SettingsView>, ProblemResponse> {
    let patch = read_body(payload)?;
    let product = save_product(&state, &product_id, patch).await?;
    let view = SettingsView::from_product(&product, &state.timezone());
    Ok(Json(view))
}

async fn get_preorder_date(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Result<Json<PreorderDateView>, ProblemResponse> {
    let product = fetch_product(&state, &product_id).await?;
    let view = PreorderDateView::from_product(&product, &state.timezone());
    Ok(Json(view))
}

async fn put_preorder_date(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    payload: Result<Json<PreorderDatePatch>, JsonRejection>,
) -> Result<Json<PreorderDateView>, ProblemResponse> {
    let patch = read_body(payload)?;
    let product = save_product(&state, &product_id, patch).await?;
    let view = PreorderDateView::from_product(&product, &state.timezone());
    Ok(Json(view))
}

async fn get_size_chart(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Result<Json<SizeChartView>, ProblemResponse> {
    let product = fetch_product(&state, &product_id).await?;
    Ok(Json(SizeChartView::from_product(&product)))
}

async fn put_size_chart(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    payload: Result<Json<SizeChart>, JsonRejection>,
) -> Result<Json<SizeChartView>, ProblemResponse> {
    let chart = read_body(payload)?;
    let product = save_product(&state, &product_id, SizeChartPatch(chart)).await?;
    Ok(Json(SizeChartView::from_product(&product)))
}

/// Applies the edits, in order, to the draft built from the current chart.
/// Nothing is saved when any edit is rejected.
async fn patch_size_chart(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    payload: Result<Json<SizeChartEdits>, JsonRejection>,
) -> Result<Json<SizeChartView>, ProblemResponse> {
    let SizeChartEdits { edits } = read_body(payload)?;
    let product = fetch_product(&state, &product_id).await?;

    let mut draft = SizeChart::draft_from_saved(&read_size_chart(product.metadata.as_ref()));
    for (position, edit) in edits.iter().enumerate() {
        draft.apply_edit(edit).map_err(|err| {
            ProblemResponse::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_edit",
                format!("edit {position}: {err}"),
            )
        })?;
    }

    let updated = write_product(&state, &product, SizeChartPatch(draft)).await?;
    Ok(Json(SizeChartView::from_product(&updated)))
}

async fn get_colors(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Result<Json<ColorsView>, ProblemResponse> {
    let product = fetch_product(&state, &product_id).await?;
    Ok(Json(ColorsView::from_product(&product)))
}

async fn put_colors(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    payload: Result<Json<SwatchColorsPatch>, JsonRejection>,
) -> Result<Json<ColorsView>, ProblemResponse> {
    let patch = read_body(payload)?;
    let product = save_product(&state, &product_id, patch).await?;
    Ok(Json(ColorsView::from_product(&product)))
}

async fn get_product_state(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Result<Json<ProductStateView>, ProblemResponse> {
    let product = fetch_product(&state, &product_id).await?;
    Ok(Json(ProductStateView::from_product(&product)))
}

async fn put_product_state(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    payload: Result<Json<ProductStatePatch>, JsonRejection>,
) -> Result<Json<ProductStateView>, ProblemResponse> {
    let patch = read_body(payload)?;
    let product = save_product(&state, &product_id, patch).await?;
    Ok(Json(ProductStateView::from_product(&product)))
}

async fn get_variant_color(
    State(state): State<AppState>,
    Path((product_id, variant_id)): Path<(String, String)>,
) -> Result<Json<VariantColorView>, ProblemResponse> {
    let variant = state
        .commerce()
        .get_variant(&product_id, &variant_id)
        .await
        .map_err(|err| ProblemResponse::upstream("variant", &err))?;
    Ok(Json(VariantColorView {
        color: read_variant_color(variant.metadata.as_ref()),
        product_id,
        variant_id: variant.id,
    }))
}

/// Re-fetches the variant so keys written by other editors survive the save.
async fn put_variant_color(
    State(state): State<AppState>,
    Path((product_id, variant_id)): Path<(String, String)>,
    payload: Result<Json<VariantColorPatch>, JsonRejection>,
) -> Result<Json<VariantColorView>, ProblemResponse> {
    let patch = read_body(payload)?;
    let widget = VariantColorPatch::NAME;

    let variant = state
        .commerce()
        .get_variant(&product_id, &variant_id)
        .await
        .map_err(|err| write_failed(widget, "variant", &err))?;
    let merged = merge_patch(variant.metadata.as_ref(), patch);
    state
        .commerce()
        .update_variant_metadata(&product_id, &variant_id, &merged)
        .await
        .map_err(|err| write_failed(widget, "variant", &err))?;

    record_write(widget, &product_id);
    Ok(Json(VariantColorView {
        color: read_variant_color(Some(&merged)),
        product_id,
        variant_id,
    }))
}

async fn fetch_product(
    state: &AppState,
    product_id: &str,
) -> Result<ProductResource, ProblemResponse> {
    state
        .commerce()
        .get_product(product_id)
        .await
        .map_err(|err| ProblemResponse::upstream("product", &err))
}

async fn save_product<P: MetadataPatch>(
    state: &AppState,
    product_id: &str,
    patch: P,
) -> Result<ProductResource, ProblemResponse> {
    let product = state
        .commerce()
        .get_product(product_id)
        .await
        .map_err(|err| write_failed(P::NAME, "product", &err))?;
    write_product(state, &product, patch).await
}

async fn write_product<P: MetadataPatch>(
    state: &AppState,
    current: &ProductResource,
    patch: P,
) -> Result<ProductResource, ProblemResponse> {
    let merged: Metadata = merge_patch(current.metadata.as_ref(), patch);
    let mut updated = state
        .commerce()
        .update_product_metadata(&current.id, &merged)
        .await
        .map_err(|err| write_failed(P::NAME, "product", &err))?;
    if updated.metadata.is_none() {
        updated.metadata = Some(merged);
    }

    record_write(P::NAME, &current.id);
    Ok(updated)
}

fn record_write(widget: &'static str, entity_id: &str) {
    counter!("admin_metadata_writes_total", "widget" => widget, "result" => "ok").increment(1);
    info!(stage = "admin", widget, %entity_id, "metadata saved");
}

fn write_failed(widget: &'static str, entity: &str, err: &CommerceError) -> ProblemResponse {
    counter!("admin_metadata_writes_total", "widget" => widget, "result" => "error").increment(1);
    warn!(stage = "admin", widget, entity, error = %err, "metadata save failed");
    ProblemResponse::upstream(entity, err)
}

fn read_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ProblemResponse> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| {
            ProblemResponse::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_body",
                rejection.body_text(),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;
    use httpmock::prelude::*;
    use serde_json::json;
    use tower::ServiceExt;

    use crate::test_support::{admin_request, product_body, read_json, TestContext};

    const BASE: &str = "/admin/widgets/products/prod_1";

    #[tokio::test]
    async fn colors_save_preserves_sibling_keys() {
        let ctx = TestContext::new().await;
        let fetch = ctx
            .commerce
            .mock_async(|when, then| {
                when.method(GET).path("/admin/products/prod_1");
                then.status(200).json_body(product_body(json!({
                    "coming_soon": "true",
                    "size_chart": "{}",
                    "colors": "[\"#000000\"]"
                })));
            })
            .await;
        let saved = json!({
            "coming_soon": "true",
            "size_chart": "{}",
            "colors": "[\"#ff0000\",\"#00aaff\"]"
        });
        let expected_body = json!({ "metadata": saved.clone() });
        let update = ctx
            .commerce
            .mock_async(move |when, then| {
                when.method(POST)
                    .path("/admin/products/prod_1")
                    .json_body(expected_body);
                then.status(200).json_body(product_body(saved));
            })
            .await;

        let response = ctx
            .router()
            .oneshot(admin_request(
                Method::PUT,
                &format!("{BASE}/colors"),
                Some(json!({"colors": ["#FF0000", "#00aaff"]})),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        fetch.assert_async().await;
        update.assert_async().await;
        let payload = read_json(response).await;
        assert_eq!(payload["colors"], json!(["#ff0000", "#00aaff"]));
    }

    #[tokio::test]
    async fn settings_read_string_flags_and_dates() {
        let ctx = TestContext::new().await;
        ctx.commerce
            .mock_async(|when, then| {
                when.method(GET).path("/admin/products/prod_1");
                then.status(200).json_body(product_body(json!({
                    "coming_soon": "true",
                    "pre_order_date": "2025-04-01T08:30:00.000Z"
                })));
            })
            .await;

        let response = ctx
            .router()
            .oneshot(admin_request(Method::GET, &format!("{BASE}/settings"), None))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let payload = read_json(response).await;
        assert_eq!(payload["coming_soon"], true);
        assert_eq!(payload["pre_order_date"], "2025-04-01T08:30:00Z");
    }

    #[tokio::test]
    async fn settings_read_can_be_saved_back_unchanged() {
        let ctx = TestContext::new().await;
        ctx.commerce
            .mock_async(|when, then| {
                when.method(GET).path("/admin/products/prod_1");
                then.status(200).json_body(product_body(json!({
                    "coming_soon": "true",
                    "pre_order_date": "2025-04-01 10:30:00",
                    "colors": "[\"#000000\"]"
                })));
            })
            .await;
        let saved = json!({
            "coming_soon": "true",
            "pre_order_date": "2025-04-01T08:30:00.000Z",
            "colors": "[\"#000000\"]"
        });
        let expected_body = json!({ "metadata": saved.clone() });
        let update = ctx
            .commerce
            .mock_async(move |when, then| {
                when.method(POST)
                    .path("/admin/products/prod_1")
                    .json_body(expected_body);
                then.status(200).json_body(product_body(saved));
            })
            .await;

        let read = ctx
            .router()
            .oneshot(admin_request(Method::GET, &format!("{BASE}/settings"), None))
            .await
            .expect("response");
        assert_eq!(read.status(), StatusCode::OK);
        let view = read_json(read).await;
        assert_eq!(view["pre_order_date"], "2025-04-01T08:30:00Z");

        let body = json!({
            "coming_soon": view["coming_soon"],
            "pre_order_date": view["pre_order_date"]
        });
        let response = ctx
            .router()
            .oneshot(admin_request(
                Method::PUT,
                &format!("{BASE}/settings"),
                Some(body),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        update.assert_async().await;
        let payload = read_json(response).await;
        assert_eq!(payload["coming_soon"], true);
        assert_eq!(payload["pre_order_date"], "2025-04-01T08:30:00Z");
    }

    #[tokio::test]
    async fn settings_save_clears_date_and_keeps_siblings() {
        let ctx = TestContext::new().await;
        ctx.commerce
            .mock_async(|when, then| {
                when.method(GET).path("/admin/products/prod_1");
                then.status(200).json_body(product_body(json!({
                    "coming_soon": "true",
                    "pre_order_date": "2025-04-01 10:30:00",
                    "size_chart": "{}",
                    "product_state": "new"
                })));
            })
            .await;
        let saved = json!({
            "coming_soon": "false",
            "pre_order_date": null,
            "size_chart": "{}",
            "product_state": "new"
        });
        let expected_body = json!({ "metadata": saved.clone() });
        let update = ctx
            .commerce
            .mock_async(move |when, then| {
                when.method(POST)
                    .path("/admin/products/prod_1")
                    .json_body(expected_body);
                then.status(200).json_body(product_body(saved));
            })
            .await;

        let response = ctx
            .router()
            .oneshot(admin_request(
                Method::PUT,
                &format!("{BASE}/settings"),
                Some(json!({"coming_soon": false, "pre_order_date": null})),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        update.assert_async().await;
        let payload = read_json(response).await;
        assert_eq!(payload["coming_soon"], false);
        assert!(payload["pre_order_date"].is_null());
    }

    #[tokio::test]
    async fn preorder_date_shows_zoned_values_in_store_time() {
        let ctx = TestContext::new().await;
        ctx.commerce
            .mock_async(|when, then| {
                when.method(GET).path("/admin/products/prod_1");
                then.status(200).json_body(product_body(json!({
                    "pre_order_date": "2025-04-01T08:30:00.000Z"
                })));
            })
            .await;

        let response = ctx
            .router()
            .oneshot(admin_request(
                Method::GET,
                &format!("{BASE}/preorder-date"),
                None,
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let payload = read_json(response).await;
        assert_eq!(payload["pre_order_date"], "2025-04-01T10:30:00");
        assert_eq!(payload["display"], "01 Apr 2025, 10:30");
    }

    #[tokio::test]
    async fn preorder_date_save_keeps_siblings() {
        let ctx = TestContext::new().await;
        ctx.commerce
            .mock_async(|when, then| {
                when.method(GET).path("/admin/products/prod_1");
                then.status(200).json_body(product_body(json!({
                    "coming_soon": "true",
                    "colors": "[\"#000000\"]",
                    "pre_order_date": "2025-04-01T08:30:00.000Z"
                })));
            })
            .await;
        let saved = json!({
            "coming_soon": "true",
            "colors": "[\"#000000\"]",
            "pre_order_date": "2025-05-01 09:00:00"
        });
        let expected_body = json!({ "metadata": saved.clone() });
        let update = ctx
            .commerce
            .mock_async(move |when, then| {
                when.method(POST)
                    .path("/admin/products/prod_1")
                    .json_body(expected_body);
                then.status(200).json_body(product_body(saved));
            })
            .await;

        let response = ctx
            .router()
            .oneshot(admin_request(
                Method::PUT,
                &format!("{BASE}/preorder-date"),
                Some(json!({"pre_order_date": "2025-05-01T09:00:00"})),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        update.assert_async().await;
        let payload = read_json(response).await;
        assert_eq!(payload["display"], "01 May 2025, 09:00");
    }

    #[tokio::test]
    async fn product_state_save_keeps_siblings() {
        let ctx = TestContext::new().await;
        ctx.commerce
            .mock_async(|when, then| {
                when.method(GET).path("/admin/products/prod_1");
                then.status(200).json_body(product_body(json!({
                    "coming_soon": "true",
                    "size_chart": "{}",
                    "product_state": "new"
                })));
            })
            .await;
        let saved = json!({
            "coming_soon": "true",
            "size_chart": "{}",
            "product_state": "sold_out",
            "table": "{\"rows\":2}"
        });
        let expected_body = json!({ "metadata": saved.clone() });
        let update = ctx
            .commerce
            .mock_async(move |when, then| {
                when.method(POST)
                    .path("/admin/products/prod_1")
                    .json_body(expected_body);
                then.status(200).json_body(product_body(saved));
            })
            .await;

        let response = ctx
            .router()
            .oneshot(admin_request(
                Method::PUT,
                &format!("{BASE}/state"),
                Some(json!({"product_state": "sold_out", "table": {"rows": 2}})),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        update.assert_async().await;
        let payload = read_json(response).await;
        assert_eq!(payload["product_state"], "sold_out");
    }

    #[tokio::test]
    async fn preorder_date_reports_display_value() {
        let ctx = TestContext::new().await;
        ctx.commerce
            .mock_async(|when, then| {
                when.method(GET).path("/admin/products/prod_1");
                then.status(200).json_body(product_body(json!({})));
            })
            .await;

        let response = ctx
            .router()
            .oneshot(admin_request(
                Method::GET,
                &format!("{BASE}/preorder-date"),
                None,
            ))
            .await
            .expect("response");

        let payload = read_json(response).await;
        assert_eq!(payload["display"], "Not set");
        assert!(payload["pre_order_date"].is_null());
    }

    #[tokio::test]
    async fn size_chart_edits_apply_to_fetched_draft() {
        let ctx = TestContext::new().await;
        ctx.commerce
            .mock_async(|when, then| {
                when.method(GET).path("/admin/products/prod_1");
                then.status(200)
                    .json_body(product_body(json!({"colors": "[\"#000000\"]"})));
            })
            .await;
        let update = ctx
            .commerce
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/admin/products/prod_1")
                    .body_contains("\"colors\":\"[\\\"#000000\\\"]\"")
                    .body_contains("Chest");
                then.status(200).json_body(json!({"product": {"id": "prod_1"}}));
            })
            .await;

        let response = ctx
            .router()
            .oneshot(admin_request(
                Method::PATCH,
                &format!("{BASE}/size-chart"),
                Some(json!({"edits": [
                    {"op": "update_cell", "row": 0, "column": 2, "value": "88"},
                    {"op": "remove_size", "index": 5}
                ]})),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        update.assert_async().await;
        let payload = read_json(response).await;
        assert_eq!(payload["chart"]["sizes"], json!(["XS", "S", "M", "L", "XL"]));
        assert_eq!(payload["chart"]["measurements"][0]["values"][2], "88");
        assert_eq!(payload["has_chart"], true);
    }

    #[tokio::test]
    async fn rejected_size_chart_edit_saves_nothing() {
        let ctx = TestContext::new().await;
        ctx.commerce
            .mock_async(|when, then| {
                when.method(GET).path("/admin/products/prod_1");
                then.status(200).json_body(product_body(json!({})));
            })
            .await;
        let update = ctx
            .commerce
            .mock_async(|when, then| {
                when.method(POST).path("/admin/products/prod_1");
                then.status(200);
            })
            .await;

        let response = ctx
            .router()
            .oneshot(admin_request(
                Method::PATCH,
                &format!("{BASE}/size-chart"),
                Some(json!({"edits": [{"op": "remove_measurement", "index": 40}]})),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let payload = read_json(response).await;
        assert_eq!(payload["type"], "invalid_edit");
        update.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn variant_color_save_refetches_variant() {
        let ctx = TestContext::new().await;
        let fetch = ctx
            .commerce
            .mock_async(|when, then| {
                when.method(GET).path("/admin/products/prod_1/variants/var_1");
                then.status(200).json_body(json!({
                    "variant": {
                        "id": "var_1",
                        "product_id": "prod_1",
                        "metadata": {"color": "#ffffff", "sku_note": "keep"}
                    }
                }));
            })
            .await;
        let update = ctx
            .commerce
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/admin/products/prod_1/variants/var_1")
                    .json_body(json!({"metadata": {"color": "#123abc", "sku_note": "keep"}}));
                then.status(200).json_body(json!({"product": {"id": "prod_1"}}));
            })
            .await;

        let response = ctx
            .router()
            .oneshot(admin_request(
                Method::PUT,
                &format!("{BASE}/variants/var_1/color"),
                Some(json!({"color": "#123ABC"})),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        fetch.assert_async().await;
        update.assert_async().await;
        let payload = read_json(response).await;
        assert_eq!(payload["color"], "#123abc");
    }

    #[tokio::test]
    async fn invalid_color_is_rejected_before_upstream() {
        let ctx = TestContext::new().await;
        let fetch = ctx
            .commerce
            .mock_async(|when, then| {
                when.method(GET).path("/admin/products/prod_1");
                then.status(200).json_body(product_body(json!({})));
            })
            .await;

        let response = ctx
            .router()
            .oneshot(admin_request(
                Method::PUT,
                &format!("{BASE}/colors"),
                Some(json!({"colors": ["red"]})),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        fetch.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn upstream_failures_map_to_problems() {
        let ctx = TestContext::new().await;
        ctx.commerce
            .mock_async(|when, then| {
                when.method(GET).path("/admin/products/missing");
                then.status(404).body("not found");
            })
            .await;
        ctx.commerce
            .mock_async(|when, then| {
                when.method(GET).path("/admin/products/prod_1");
                then.status(200).json_body(product_body(json!({})));
            })
            .await;
        ctx.commerce
            .mock_async(|when, then| {
                when.method(POST).path("/admin/products/prod_1");
                then.status(500).body("boom");
            })
            .await;

        let missing = ctx
            .router()
            .oneshot(admin_request(
                Method::GET,
                "/admin/widgets/products/missing/state",
                None,
            ))
            .await
            .expect("response");
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(read_json(missing).await["type"], "not_found");

        let failed = ctx
            .router()
            .oneshot(admin_request(
                Method::PUT,
                &format!("{BASE}/state"),
                Some(json!({"product_state": "sold_out", "table": {"rows": 2}})),
            ))
            .await
            .expect("response");
        assert_eq!(failed.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(read_json(failed).await["type"], "upstream_error");
    }
}
