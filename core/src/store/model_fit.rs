use super::ClvStore;
use crate::{engine::FitReport, error::ClvResult};
use rusqlite::{params, OptionalExtension};

impl ClvStore {
    // ── Model fits ────────────────────────────────────────────────

    pub fn record_fit(&self, report: &FitReport) -> ClvResult<()> {
        let json = serde_json::to_string(report)?;
        self.conn.execute(
            "INSERT INTO model_fit (fit_id, observation_end, report_json) VALUES (?1, ?2, ?3)",
            params![&report.fit_id, report.observation_end.to_rfc3339(), json],
        )?;
        log::debug!("Fit {} recorded", report.fit_id);
        Ok(())
    }

    /// Most recently recorded fit, if any.
    pub fn latest_fit(&self) -> ClvResult<Option<FitReport>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT report_json FROM model_fit ORDER BY seq DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(Into::into))
            .transpose()
    }

    pub fn fit_count(&self) -> ClvResult<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM model_fit", [], |row| row.get(0))?;
        Ok(n)
    }
}
