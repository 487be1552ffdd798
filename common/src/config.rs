//! Output configuration for the command line tools

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

impl OutputConfig {
    /// Default log directive for the configured verbosity, overridable through `RUST_LOG`.
    #[must_use]
    pub fn log_directive(&self) -> &'static str {
        if self.quiet {
            return "off";
        }
        match self.verbose {
            0 => "error",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// Verbosity implies the summary.
    #[must_use]
    pub fn shows_summary(&self) -> bool {
        self.print_summary || self.verbose > 0
    }
}
