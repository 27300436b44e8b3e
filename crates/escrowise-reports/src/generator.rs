//! Report generator: a registry of handlers keyed by report type.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};

use crate::params::ReportParams;
use crate::payload::{ReportData, ReportPayload};
use crate::store::ReportStore;
use escrowise_core::error::{EscrowiseError, Result};

/// Produces the data for one report type.
pub trait ReportHandler: Send + Sync {
    /// Human-readable title, e.g. "Transactions Report".
    fn report_name(&self) -> &str;

    fn generate(&self, store: &dyn ReportStore, params: &ReportParams) -> Result<ReportData>;
}

/// Looks up the handler for a report type and runs it against the store.
#[derive(Clone)]
pub struct ReportGenerator {
    store: Arc<dyn ReportStore>,
    handlers: HashMap<String, Arc<dyn ReportHandler>>,
}

impl ReportGenerator {
    /// Generator with every builtin report type registered.
    pub fn new(store: Arc<dyn ReportStore>) -> Self {
        let mut generator = Self::empty(store);
        crate::builtin::register_builtin(&mut generator);
        crate::analysis::register_analysis(&mut generator);
        crate::payouts::register_payouts(&mut generator);
        generator
    }

    /// Generator with no handlers.
    pub fn empty(store: Arc<dyn ReportStore>) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
        }
    }

    /// Add or replace the handler for `report_type`.
    pub fn register(&mut self, report_type: &str, handler: Arc<dyn ReportHandler>) {
        self.handlers.insert(report_type.to_string(), handler);
    }

    pub fn is_registered(&self, report_type: &str) -> bool {
        self.handlers.contains_key(report_type)
    }

    /// Registered report types, sorted.
    pub fn report_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn store(&self) -> &Arc<dyn ReportStore> {
        &self.store
    }

    fn handler(&self, report_type: &str) -> Result<&Arc<dyn ReportHandler>> {
        self.handlers
            .get(report_type)
            .ok_or_else(|| EscrowiseError::UnknownReportType(report_type.to_string()))
    }

    /// Check that `report_type` is registered and `parameters` parse for it.
    pub fn validate(&self, report_type: &str, parameters: &serde_json::Value) -> Result<ReportParams> {
        self.handler(report_type)?;
        ReportParams::parse(report_type, parameters)
    }

    pub fn generate(&self, report_type: &str, parameters: &serde_json::Value) -> Result<ReportPayload> {
        self.generate_at(report_type, parameters, Utc::now().trunc_subsecs(0))
    }

    /// Generate with an explicit `generated_at`. An unknown type fails before
    /// any store access.
    pub fn generate_at(
        &self,
        report_type: &str,
        parameters: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<ReportPayload> {
        let handler = self.handler(report_type)?;
        let params = ReportParams::parse(report_type, parameters)?;
        let data = handler
            .generate(self.store.as_ref(), &params)
            .map_err(|e| e.with_context(&format!("{report_type} report")))?;

        tracing::debug!(
            "Generated {report_type} report: {} row(s)",
            data.row_count()
        );
        Ok(ReportPayload {
            report_name: handler.report_name().to_string(),
            report_type: report_type.to_string(),
            generated_at: now,
            parameters: parameters.clone(),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CountingStore;
    use serde_json::json;

    struct StaticReport;

    impl ReportHandler for StaticReport {
        fn report_name(&self) -> &str {
            "Static Report"
        }

        fn generate(&self, _store: &dyn ReportStore, params: &ReportParams) -> Result<ReportData> {
            let ReportParams::Custom { parameters, .. } = params else {
                return Err(params.mismatch("static"));
            };
            let row = json!({"echo": parameters}).as_object().cloned().unwrap_or_default();
            Ok(ReportData::rows(vec![row], 1))
        }
    }

    #[test]
    fn test_unknown_type_makes_no_queries() {
        let store = Arc::new(CountingStore::new());
        let generator = ReportGenerator::new(store.clone());

        let err = generator.generate("escrow_balances", &json!({})).unwrap_err();
        assert!(matches!(err, EscrowiseError::UnknownReportType(ref t) if t == "escrow_balances"));
        assert_eq!(store.queries(), 0);

        let err = generator.validate("escrow_balances", &json!({})).unwrap_err();
        assert!(matches!(err, EscrowiseError::UnknownReportType(_)));
    }

    #[test]
    fn test_builtin_types_registered() {
        let generator = ReportGenerator::new(Arc::new(CountingStore::new()));
        assert_eq!(
            generator.report_types(),
            vec![
                "dispute_analysis",
                "disputes",
                "fees",
                "financial",
                "payouts",
                "revenue_analysis",
                "transactions",
                "user_activity",
                "users"
            ]
        );
    }

    #[test]
    fn test_store_errors_get_report_context() {
        let store = Arc::new(CountingStore::failing());
        let generator = ReportGenerator::new(store);
        let err = generator.generate("users", &json!({})).unwrap_err();
        match err {
            EscrowiseError::DataQuery { context, .. } => assert_eq!(context, "users report"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_registered_handler_gets_custom_params() {
        let mut generator = ReportGenerator::empty(Arc::new(CountingStore::new()));
        generator.register("static", Arc::new(StaticReport));
        let now = Utc::now().trunc_subsecs(0);

        let payload = generator.generate_at("static", &json!({"k": 1}), now).unwrap();
        assert_eq!(payload.report_name, "Static Report");
        assert_eq!(payload.generated_at, now);
        assert_eq!(payload.parameters, json!({"k": 1}));
        assert_eq!(payload.data.row_count(), 1);
    }

    #[test]
    fn test_bad_params_rejected() {
        let generator = ReportGenerator::new(Arc::new(CountingStore::new()));
        let err = generator
            .validate("transactions", &json!({"startDate": "yesterday"}))
            .unwrap_err();
        assert!(matches!(err, EscrowiseError::InvalidParameters(_)));
    }
}
