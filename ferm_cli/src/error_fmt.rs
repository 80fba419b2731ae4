//! Human-readable error descriptions and structured JSON error formatting.

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    use ferm_core::error::{BuildError, ChamberError, StoreError};

    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingBus => {
                "What happened: No one-wire bus was provided to the chamber.\nLikely causes: The bus failed to initialize or was not wired into the builder.\nHow to fix: Ensure the bus is created successfully and passed via with_bus(...).".to_string()
            }
            BuildError::MissingCooler => {
                "What happened: No cooler relay was provided to the chamber.\nLikely causes: Relay output failed to initialize or was not wired into the builder.\nHow to fix: Check [relays] in the config and pass the relay via with_cooler(...).".to_string()
            }
            BuildError::MissingHeater => {
                "What happened: No heater relay was provided to the chamber.\nLikely causes: Relay output failed to initialize or was not wired into the builder.\nHow to fix: Check [relays] in the config and pass the relay via with_heater(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/ferm_config.toml for a sample."
            ),
        };
    }

    if let Some(se) = err.downcast_ref::<StoreError>() {
        return match se {
            StoreError::VersionMismatch { found, expected } => format!(
                "What happened: No usable controller state (stored version {found}, expected {expected}).\nLikely causes: The chamber has never saved its state, or the file was written by another firmware version.\nHow to fix: Run `ferm run` once to create a fresh record."
            ),
            StoreError::OutOfRange(field) => format!(
                "What happened: The stored controller state has an invalid {field}.\nLikely causes: The state file was corrupted or edited by hand.\nHow to fix: Delete the file at persistence.path; it is rebuilt from the config on the next run."
            ),
            StoreError::Io(msg) => format!(
                "What happened: Could not access the state file ({msg}).\nLikely causes: Missing directory or insufficient permissions.\nHow to fix: Check persistence.path in the config and the permissions of its directory."
            ),
        };
    }

    if let Some(ce) = err.downcast_ref::<ChamberError>() {
        return match ce {
            ChamberError::HardwareFault(msg) => format!(
                "What happened: Probe fault ({msg}).\nLikely causes: A temperature probe is disconnected, or the beer/fridge indexes do not match the wiring.\nHow to fix: Check probe wiring and the 4.7k pull-up, run `ferm self-check`, and review sensors.beer_index/fridge_index."
            ),
            ChamberError::Timeout => {
                "What happened: A probe did not finish its conversion in time.\nLikely causes: Parasite power without a strong pull-up, or sensors.max_polls too low.\nHow to fix: Check probe power and raise sensors.max_polls in the config.".to_string()
            }
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = format!("{err:#}").to_ascii_lowercase();

    if lower.contains("parse config") || lower.contains("read config") {
        return format!(
            "What happened: The configuration file could not be loaded ({lower}).\nLikely causes: Wrong --config path, a TOML syntax error, or an unknown key.\nHow to fix: Check the path and compare the file with etc/ferm_config.toml."
        );
    }

    if lower.contains(" must ") {
        return format!(
            "What happened: Configuration is invalid ({msg}).\nLikely causes: An out-of-range value in the TOML.\nHow to fix: Edit the config file and try again."
        );
    }

    if lower.contains("gpio") || lower.contains("relay") {
        return "What happened: Failed to initialize relay outputs.\nLikely causes: Incorrect pin numbers or insufficient GPIO permissions.\nHow to fix: Fix the [relays] values in the config; ensure the process has permission to access GPIO.".to_string();
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Details: {msg}"
    )
}

/// Stable exit codes: 3 for probe/hardware faults, 4 for persistence, 1 otherwise.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    use ferm_core::error::{ChamberError, StoreError};
    if let Some(ce) = err.downcast_ref::<ChamberError>() {
        return match ce {
            ChamberError::Hardware(_) | ChamberError::HardwareFault(_) | ChamberError::Timeout => 3,
            _ => 1,
        };
    }
    if err.downcast_ref::<StoreError>().is_some() {
        return 4;
    }
    1
}

fn reason_name(err: &eyre::Report) -> &'static str {
    use ferm_core::error::{BuildError, ChamberError, StoreError};
    if err.downcast_ref::<BuildError>().is_some() {
        return "Build";
    }
    if let Some(ce) = err.downcast_ref::<ChamberError>() {
        return match ce {
            ChamberError::Hardware(_) => "Hardware",
            ChamberError::HardwareFault(_) => "HardwareFault",
            ChamberError::Config(_) => "Config",
            ChamberError::Timeout => "Timeout",
            ChamberError::Persistence(_) => "Persistence",
            ChamberError::State(_) => "State",
        };
    }
    if err.downcast_ref::<StoreError>().is_some() {
        return "Store";
    }
    "Error"
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({ "reason": reason_name(err), "message": humanize(err) }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferm_core::error::{BuildError, ChamberError, StoreError};
    use eyre::WrapErr;

    #[test]
    fn typed_errors_survive_context() {
        let r: eyre::Result<()> = Err(eyre::Report::new(StoreError::VersionMismatch {
            found: 0xFFFF,
            expected: 11,
        }));
        let err = r.wrap_err("loading controller state").unwrap_err();
        assert!(humanize(&err).contains("never saved"));
        assert_eq!(exit_code_for_error(&err), 4);
        assert!(format_error_json(&err).contains("\"Store\""));
    }

    #[test]
    fn probe_fault_maps_to_hardware_exit_code() {
        let err = eyre::Report::new(ChamberError::HardwareFault("expected 2 probes".into()));
        assert_eq!(exit_code_for_error(&err), 3);
        assert!(humanize(&err).contains("self-check"));
    }

    #[test]
    fn build_errors_name_the_missing_part() {
        let err = eyre::Report::new(BuildError::MissingHeater);
        assert!(humanize(&err).contains("heater relay"));
        assert_eq!(exit_code_for_error(&err), 1);
    }

    #[test]
    fn config_messages_are_recognised() {
        let err = eyre::eyre!("sensors.sample_hz must be in (0.0, 10.0]");
        assert!(humanize(&err).starts_with("What happened: Configuration is invalid"));
    }
}
