//! EventPayload trait - 型付き payload の定義
//!
//! Ties a payload struct to the `event_type` tag producers write.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// EventPayload は event_type と型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct InvoicePaid {
///     invoice_id: String,
/// }
///
/// impl EventPayload for InvoicePaid {
///     const TYPE: &'static str = "invoice.paid";
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize`: producers build `NewOutboxEvent` from it
/// - `DeserializeOwned`: the dispatcher decodes the stored JSON
/// - `Send + Sync + 'static`: handlers hold it across `.await`
pub trait EventPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Tag stored in `event_type`, `{aggregate}.{past-tense verb}`.
    const TYPE: &'static str;
}
