#[cfg(feature = "metrics")]
pub(crate) fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn metric_inc(_name: &'static str) {}

#[cfg(feature = "metrics")]
pub(crate) fn metric_inc_target(name: &'static str, target_id: &crate::types::TargetId) {
    metrics::increment_counter!(name, "target" => target_id.0.clone());
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn metric_inc_target(_name: &'static str, _target_id: &crate::types::TargetId) {}
