//! Runs plan requests against a [`TripStore`]

use uuid::Uuid;

use crate::api::{Result, TripClient, TripFormData, TripPlanResponse};
use crate::store::TripStore;

/// Stream a plan into `store`.
///
/// The form is saved, a fresh request id is started, and every event is
/// folded into the store while this request is still current. The request
/// is always finished afterwards. Failures other than cancellation are
/// recorded as the store's error; a cancelled request leaves it untouched.
pub async fn run_streaming(
    client: &TripClient,
    store: &TripStore,
    form: &TripFormData,
) -> Result<TripPlanResponse> {
    let request_id = begin(store, form);

    let result = client
        .plan_trip_stream(form, |event| {
            store.update_progress_for(&request_id, event);
        })
        .await;

    settle(store, &request_id, &result);
    result
}

/// Same as [`run_streaming`] but through the retrying one-shot endpoint.
pub async fn run_blocking(
    client: &TripClient,
    store: &TripStore,
    form: &TripFormData,
) -> Result<TripPlanResponse> {
    let request_id = begin(store, form);

    let result = client.plan_trip(form).await;
    if let Ok(TripPlanResponse {
        data: Some(plan), ..
    }) = &result
    {
        store.set_trip_plan_for(&request_id, plan.clone());
    }

    settle(store, &request_id, &result);
    result
}

fn begin(store: &TripStore, form: &TripFormData) -> String {
    if let Err(e) = store.save_form_data(form) {
        tracing::warn!("Failed to persist form data: {}", e);
    }

    let request_id = Uuid::new_v4().to_string();
    store.start_request(&request_id);
    request_id
}

fn settle(store: &TripStore, request_id: &str, result: &Result<TripPlanResponse>) {
    if let Err(e) = result {
        if e.is_cancelled() {
            tracing::debug!("Request {} cancelled", request_id);
        } else {
            store.report_error_for(request_id, &e.to_string());
        }
    }
    store.finish_request_for(request_id);
}
