//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable:
//! - `FUMBLE_LOG_LEVEL`: Filter-Direktive (z.B. `debug` oder
//!   `info,fumble_signaling=trace`), ueberschreibt die Konfiguration
//! - `FUMBLE_LOG_FORMAT`: Format (text/json), ueberschreibt die Konfiguration

use tracing_subscriber::{fmt, EnvFilter};

/// Umgebungsvariable fuer den Log-Level
pub const ENV_LOG_LEVEL: &str = "FUMBLE_LOG_LEVEL";

/// Umgebungsvariable fuer das Log-Format
pub const ENV_LOG_FORMAT: &str = "FUMBLE_LOG_FORMAT";

/// Initialisiert das Logging-System.
///
/// Umgebungsvariablen haben Vorrang vor `level` / `format` aus der
/// Konfiguration. Ein ungueltiger Filter faellt auf `info` zurueck.
pub fn logging_initialisieren(level: &str, format: &str) {
    let filter = EnvFilter::try_from_env(ENV_LOG_LEVEL)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match format_aus_umgebung(format) {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .with_current_span(true)
                .init();
        }
        _ => {
            fmt().with_env_filter(filter).with_target(true).init();
        }
    }
}

/// Liest `FUMBLE_LOG_FORMAT` und faellt auf `aus_config` zurueck
fn format_aus_umgebung(aus_config: &str) -> &'static str {
    let aus_env = std::env::var(ENV_LOG_FORMAT).ok();
    effektives_format(aus_env.as_deref(), aus_config)
}

/// Waehlt das Format: Umgebung vor Konfiguration, Unbekanntes wird zu `text`
fn effektives_format(aus_env: Option<&str>, aus_config: &str) -> &'static str {
    match aus_env.unwrap_or(aus_config) {
        "json" => "json",
        _ => "text",
    }
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_gueltige_werte() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(log_level_gueltig(level), "{level} muss gueltig sein");
        }
    }

    #[test]
    fn log_level_ungueltige_werte() {
        assert!(!log_level_gueltig("verbose"));
        assert!(!log_level_gueltig("INFO")); // Gross-/Kleinschreibung
        assert!(!log_level_gueltig(""));
    }

    #[test]
    fn log_format_werte() {
        assert!(log_format_gueltig("text"));
        assert!(log_format_gueltig("json"));
        assert!(!log_format_gueltig("xml"));
        assert!(!log_format_gueltig("JSON"));
    }

    #[test]
    fn umgebung_hat_vorrang() {
        assert_eq!(effektives_format(Some("json"), "text"), "json");
        assert_eq!(effektives_format(None, "json"), "json");
    }

    #[test]
    fn unbekanntes_format_wird_text() {
        assert_eq!(effektives_format(Some("xml"), "json"), "text");
        assert_eq!(effektives_format(None, "yaml"), "text");
    }

    #[test]
    fn format_aus_umgebungsvariable() {
        // Einziger Test, der FUMBLE_LOG_FORMAT anfasst
        std::env::set_var(ENV_LOG_FORMAT, "json");
        assert_eq!(format_aus_umgebung("text"), "json");

        std::env::remove_var(ENV_LOG_FORMAT);
        assert_eq!(format_aus_umgebung("json"), "json");
        assert_eq!(format_aus_umgebung("text"), "text");
    }
}
