//! Metric names and recording helpers for the admin console.
//!
//! Counters go through the `metrics` facade; the Prometheus exporter is only
//! installed when `BUTTER_METRICS_PORT` is set.

use std::fmt;
use std::net::SocketAddr;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    ImportRowsConverted,
    ImportRowsSkipped,
    ImportDocumentsWritten,
    ImportDocumentsFailed,
    ImportPhotosUploaded,
    ImportRuns,
    GeocodingRequests,
    GeocodingFailures,
    FirestoreRequests,
    FirestoreErrors,
    StorageRequests,
    NotificationsSent,
    NotificationsFailed,
    RevenueCatRequests,
    EnvironmentSwitches,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::ImportRowsConverted => "butter_import_rows_converted_total",
            MetricName::ImportRowsSkipped => "butter_import_rows_skipped_total",
            MetricName::ImportDocumentsWritten => "butter_import_documents_written_total",
            MetricName::ImportDocumentsFailed => "butter_import_documents_failed_total",
            MetricName::ImportPhotosUploaded => "butter_import_photos_uploaded_total",
            MetricName::ImportRuns => "butter_import_runs_total",
            MetricName::GeocodingRequests => "butter_geocoding_requests_total",
            MetricName::GeocodingFailures => "butter_geocoding_failures_total",
            MetricName::FirestoreRequests => "butter_firestore_requests_total",
            MetricName::FirestoreErrors => "butter_firestore_errors_total",
            MetricName::StorageRequests => "butter_storage_requests_total",
            MetricName::NotificationsSent => "butter_notifications_sent_total",
            MetricName::NotificationsFailed => "butter_notifications_failed_total",
            MetricName::RevenueCatRequests => "butter_revenuecat_requests_total",
            MetricName::EnvironmentSwitches => "butter_environment_switches_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Installs the Prometheus exporter if `BUTTER_METRICS_PORT` is set.
pub fn init_metrics() {
    let Some(port) = std::env::var("BUTTER_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
    else {
        return;
    };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => info!("Prometheus exporter listening on http://{}/metrics", addr),
        Err(e) => warn!("Prometheus exporter install failed: {}", e),
    }
}

pub fn increment(name: MetricName, env: &'static str) {
    ::metrics::counter!(name.as_str(), "env" => env).increment(1);
}

pub fn increment_by(name: MetricName, env: &'static str, value: u64) {
    ::metrics::counter!(name.as_str(), "env" => env).increment(value);
}

pub mod import {
    use super::{increment, increment_by, MetricName};

    pub fn run_started(env: &'static str) {
        increment(MetricName::ImportRuns, env);
    }

    pub fn rows_converted(env: &'static str, count: usize) {
        increment_by(MetricName::ImportRowsConverted, env, count as u64);
    }

    pub fn rows_skipped(env: &'static str, count: usize) {
        increment_by(MetricName::ImportRowsSkipped, env, count as u64);
    }

    pub fn document_written(env: &'static str) {
        increment(MetricName::ImportDocumentsWritten, env);
    }

    pub fn document_failed(env: &'static str) {
        increment(MetricName::ImportDocumentsFailed, env);
    }

    pub fn photo_uploaded(env: &'static str) {
        increment(MetricName::ImportPhotosUploaded, env);
    }
}

pub mod geocoding {
    use super::MetricName;

    pub fn request() {
        ::metrics::counter!(MetricName::GeocodingRequests.as_str()).increment(1);
    }

    pub fn failure() {
        ::metrics::counter!(MetricName::GeocodingFailures.as_str()).increment(1);
    }
}

pub mod google {
    use super::MetricName;

    pub fn firestore_request(project: &str, op: &'static str) {
        ::metrics::counter!(MetricName::FirestoreRequests.as_str(), "project" => project.to_string(), "op" => op)
            .increment(1);
    }

    pub fn firestore_error(project: &str, op: &'static str) {
        ::metrics::counter!(MetricName::FirestoreErrors.as_str(), "project" => project.to_string(), "op" => op)
            .increment(1);
    }

    pub fn storage_request(bucket: &str, op: &'static str) {
        ::metrics::counter!(MetricName::StorageRequests.as_str(), "bucket" => bucket.to_string(), "op" => op)
            .increment(1);
    }
}

pub mod notifications {
    use super::{increment_by, MetricName};

    pub fn sent(env: &'static str, count: usize) {
        increment_by(MetricName::NotificationsSent, env, count as u64);
    }

    pub fn failed(env: &'static str, count: usize) {
        increment_by(MetricName::NotificationsFailed, env, count as u64);
    }
}

pub mod revenuecat {
    use super::MetricName;

    pub fn request(api: &'static str) {
        ::metrics::counter!(MetricName::RevenueCatRequests.as_str(), "api" => api).increment(1);
    }
}

pub fn environment_switched(env: &'static str) {
    increment(MetricName::EnvironmentSwitches, env);
}
