// Copyright 2025 The Scheduled Scaling Operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Validating admission webhook for ScheduledScaling.

pub mod server;

use crate::types::v1alpha1::scheduled_scaling::ScheduledScaling;
use crate::validation;
use axum::Json;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use tracing::{debug, error, info};

pub const VALIDATE_PATH: &str = "/validate-autoscaling-mercari-com-v1alpha1-scheduledscaling";

pub async fn validate_handler(
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(review(&req).into_review())
}

/// Admits or denies one request. Deletes are always allowed and the target
/// tortoise is not looked up.
pub fn review(req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let response = AdmissionResponse::from(req);

    if matches!(req.operation, Operation::Delete | Operation::Connect) {
        return response;
    }

    let Some(object) = &req.object else {
        debug!(uid = %req.uid, "no object in request, allowing");
        return response;
    };

    let new = match decode(object) {
        Ok(new) => new,
        Err(e) => return response.deny(format!("cannot decode ScheduledScaling: {e}")),
    };

    let result = match (&req.operation, &req.old_object) {
        (Operation::Update, Some(old)) => match decode(old) {
            Ok(old) => validation::validate_update(&old, &new),
            Err(e) => return response.deny(format!("cannot decode previous ScheduledScaling: {e}")),
        },
        _ => validation::validate_spec(&new.spec),
    };

    match result {
        Ok(_) => response,
        Err(e) => {
            info!(
                uid = %req.uid,
                name = %new.name(),
                operation = ?req.operation,
                "rejecting ScheduledScaling: {}",
                e
            );
            response.deny(e.to_string())
        }
    }
}

fn decode(object: &DynamicObject) -> Result<ScheduledScaling, serde_json::Error> {
    serde_json::to_value(object).and_then(serde_json::from_value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tests::{create_test_scheduled_scaling, time_scheduled_scaling};
    use crate::types::v1alpha1::status::{Phase, ScheduledScalingStatus};
    use serde_json::{Value, json};

    fn request(operation: &str, object: Option<Value>, old: Option<Value>) -> AdmissionRequest<DynamicObject> {
        let review: AdmissionReview<DynamicObject> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "autoscaling.mercari.com", "version": "v1alpha1", "kind": "ScheduledScaling"},
                "resource": {"group": "autoscaling.mercari.com", "version": "v1alpha1", "resource": "scheduledscalings"},
                "name": "test-ss",
                "namespace": "default",
                "operation": operation,
                "userInfo": {"username": "admin"},
                "object": object,
                "oldObject": old,
                "dryRun": false
            }
        }))
        .unwrap();
        review.try_into().unwrap()
    }

    fn to_json(ss: &ScheduledScaling) -> Option<Value> {
        Some(serde_json::to_value(ss).unwrap())
    }

    #[test]
    fn test_valid_create_is_allowed() {
        let req = request("CREATE", to_json(&create_test_scheduled_scaling()), None);
        assert!(review(&req).allowed);
    }

    #[test]
    fn test_inverted_time_window_is_denied() {
        let ss = time_scheduled_scaling("2024-01-15T10:00:00Z", "2024-01-15T10:00:00Z");
        let response = review(&request("CREATE", to_json(&ss), None));

        assert!(!response.allowed);
        assert!(format!("{:?}", response.result).contains("must be after startAt"));
    }

    #[test]
    fn test_delete_is_always_allowed() {
        let ss = time_scheduled_scaling("2024-01-15T10:00:00Z", "2024-01-15T09:00:00Z");
        assert!(review(&request("DELETE", None, to_json(&ss))).allowed);
    }

    #[test]
    fn test_update_cannot_retarget_active_object() {
        let mut old = create_test_scheduled_scaling();
        old.status = Some(ScheduledScalingStatus {
            phase: Phase::Active,
            ..Default::default()
        });
        let mut new = old.clone();
        new.spec.target_refs.tortoise_name = "another".to_owned();

        let response = review(&request("UPDATE", to_json(&new), to_json(&old)));
        assert!(!response.allowed);
        assert!(format!("{:?}", response.result).contains("tortoiseName"));
    }
}
