use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Admission window, manifest depth and ordered limit are not 0
/// - Tee header, chunk and output buffer sizes are not 0
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let checks = [
        ("ingest.admission_window", config.ingest.admission_window),
        ("ingest.manifest_depth", config.ingest.manifest_depth),
        ("tee.header_size", config.tee.header_size),
        ("tee.chunk_size", config.tee.chunk_size),
        ("tee.output_buffer", config.tee.output_buffer),
        ("work.ordered_limit", config.work.ordered_limit),
    ];

    for (name, value) in checks {
        if value == 0 {
            return Err(ConfigError::ValidationError(format!("{name} cannot be 0")));
        }
    }

    Ok(())
}
