//! Rendering of snapshots into the Prometheus text exposition format.
//!
//! Rendering is a pure function of the snapshot, the current time and the
//! configuration. It performs no I/O, so a scrape never waits on Fail2ban.

use std::fmt::Write;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::{PrometheusConfig, StalenessConfig};
use crate::snapshot::{JailRecord, Snapshot};

/// Content type of the rendered payload.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Metric type used in `# TYPE` comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrometheusType {
    Counter,
    Gauge,
}

impl PrometheusType {
    /// Get the TYPE comment string for Prometheus exposition format.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrometheusType::Counter => "counter",
            PrometheusType::Gauge => "gauge",
        }
    }
}

/// Renders snapshots with a fixed prefix, label set and staleness cutoff.
#[derive(Debug, Clone)]
pub struct Renderer {
    prefix: String,
    default_labels: Vec<(String, String)>,
    max_age: Option<Duration>,
}

impl Renderer {
    /// Create a renderer from configuration.
    pub fn new(prometheus: &PrometheusConfig, staleness: &StalenessConfig) -> Self {
        let mut default_labels: Vec<(String, String)> = prometheus
            .default_labels
            .iter()
            .map(|(k, v)| (sanitize_label_name(k), v.clone()))
            .filter(|(k, _)| k != "jail" && k != "kind")
            .collect();
        default_labels.sort();
        default_labels.dedup_by(|a, b| a.0 == b.0);

        Self {
            prefix: prometheus.prefix.clone(),
            default_labels,
            max_age: staleness.max_age(),
        }
    }

    /// Whether `snapshot` is young enough to be reported as up.
    pub fn is_servable(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> bool {
        self.max_age
            .is_none_or(|max_age| snapshot.age(now) <= max_age)
    }

    /// Render the exposition payload for `snapshot` as of `now`.
    pub fn render(&self, snapshot: Option<&Snapshot>, now: DateTime<Utc>) -> String {
        let mut out = String::with_capacity(2048);
        let servable = snapshot.filter(|s| self.is_servable(s, now));
        let up = u64::from(servable.is_some());

        self.family(
            &mut out,
            "up",
            "Whether Fail2ban state is available (1) or not (0).",
            PrometheusType::Gauge,
        );
        self.sample(&mut out, "up", &[], up);

        self.family(
            &mut out,
            "exporter_up",
            "Whether the exporter holds a current snapshot (1) or not (0).",
            PrometheusType::Gauge,
        );
        self.sample(&mut out, "exporter_up", &[], up);

        let Some(snapshot) = snapshot else {
            return out;
        };

        self.family(
            &mut out,
            "snapshot_age_seconds",
            "Seconds since the current snapshot was collected.",
            PrometheusType::Gauge,
        );
        self.sample(
            &mut out,
            "snapshot_age_seconds",
            &[],
            format_value(snapshot.age(now).as_secs_f64()),
        );

        let Some(snapshot) = servable else {
            return out;
        };

        self.family(
            &mut out,
            "snapshot_timestamp_seconds",
            "Unix time at which the current snapshot was collected.",
            PrometheusType::Gauge,
        );
        self.sample(
            &mut out,
            "snapshot_timestamp_seconds",
            &[],
            format_value(snapshot.collected_at().timestamp_millis() as f64 / 1000.0),
        );

        self.family(
            &mut out,
            "poll_duration_seconds",
            "Time taken to collect the current snapshot.",
            PrometheusType::Gauge,
        );
        self.sample(
            &mut out,
            "poll_duration_seconds",
            &[],
            format_value(snapshot.poll_duration().as_secs_f64()),
        );

        self.family(
            &mut out,
            "jails",
            "Number of jails collected.",
            PrometheusType::Gauge,
        );
        self.sample(&mut out, "jails", &[], snapshot.jails().len());

        self.family(
            &mut out,
            "banned_current",
            "Hosts currently banned, summed over all jails.",
            PrometheusType::Gauge,
        );
        self.sample(
            &mut out,
            "banned_current",
            &[],
            snapshot.total_currently_banned(),
        );

        self.family(
            &mut out,
            "banned_ips_unique",
            "Distinct addresses currently banned in any jail.",
            PrometheusType::Gauge,
        );
        self.sample(
            &mut out,
            "banned_ips_unique",
            &[],
            snapshot.unique_banned_ips(),
        );

        let per_jail: [(&str, &str, PrometheusType, fn(&JailRecord) -> u64); 4] = [
            (
                "jail_banned_current",
                "Hosts currently banned by the jail.",
                PrometheusType::Gauge,
                |j| j.currently_banned,
            ),
            (
                "jail_banned_total",
                "Bans issued by the jail since Fail2ban started.",
                PrometheusType::Counter,
                |j| j.total_banned,
            ),
            (
                "jail_failed_current",
                "Failures currently tracked by the jail's filter.",
                PrometheusType::Gauge,
                |j| j.currently_failed,
            ),
            (
                "jail_failed_total",
                "Failures matched by the jail since Fail2ban started.",
                PrometheusType::Counter,
                |j| j.failed_attempts,
            ),
        ];

        if !snapshot.jails().is_empty() {
            for (name, help, metric_type, value) in per_jail {
                self.family(&mut out, name, help, metric_type);
                for jail in snapshot.jails() {
                    self.sample(&mut out, name, &[("jail", jail.name.as_str())], value(jail));
                }
            }
        }

        if !snapshot.collection_errors().is_empty() {
            self.family(
                &mut out,
                "jail_collection_error",
                "Jails that could not be collected in the last poll.",
                PrometheusType::Gauge,
            );
            for error in snapshot.collection_errors() {
                self.sample(
                    &mut out,
                    "jail_collection_error",
                    &[("jail", error.jail.as_str()), ("kind", error.kind.as_str())],
                    1,
                );
            }
        }

        out
    }

    fn family(&self, out: &mut String, name: &str, help: &str, metric_type: PrometheusType) {
        writeln!(out, "# HELP {}_{} {}", self.prefix, name, help).ok();
        writeln!(out, "# TYPE {}_{} {}", self.prefix, name, metric_type.as_str()).ok();
    }

    fn sample(
        &self,
        out: &mut String,
        name: &str,
        labels: &[(&str, &str)],
        value: impl std::fmt::Display,
    ) {
        let mut all: Vec<(&str, &str)> = labels.to_vec();
        all.extend(
            self.default_labels
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );

        writeln!(
            out,
            "{}_{}{} {}",
            self.prefix,
            name,
            format_labels(&all),
            value
        )
        .ok();
    }
}

/// Sanitize a label name to be Prometheus-compatible.
///
/// Prometheus label names must match `[a-zA-Z_][a-zA-Z0-9_]*`.
/// Labels starting with `__` are reserved for internal use.
pub fn sanitize_label_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut last_was_underscore = false;

    for (i, c) in name.chars().enumerate() {
        let valid = if i == 0 {
            c.is_ascii_alphabetic() || c == '_'
        } else {
            c.is_ascii_alphanumeric() || c == '_'
        };

        if valid {
            result.push(c);
            last_was_underscore = c == '_';
        } else if !last_was_underscore {
            result.push('_');
            last_was_underscore = true;
        }
    }

    while result.ends_with('_') {
        result.pop();
    }

    if result.is_empty() {
        return "label".to_string();
    }

    if result.starts_with("__") {
        result.insert(0, 'z');
    }

    result
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format labels for Prometheus exposition format.
fn format_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}
