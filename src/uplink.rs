use crate::state::PositionReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UplinkError {
    /// Transport not reachable right now.
    Unavailable,
    /// Collector refused the report.
    Rejected,
}

/// Delivers position reports to the remote collector. The tracker does not
/// retry; a failed report is logged and counted.
pub trait Uplink {
    async fn report(&mut self, endpoint: &str, report: &PositionReport) -> Result<(), UplinkError>;
}
