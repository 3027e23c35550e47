//! Builds a device session from configuration

use crate::config::SimulatorConfig;
use anyhow::{Context, Result};
use async_channel::Sender;
use common::DeviceNotice;
use device::{
    CompositeRouter, DeviceSession, FunctionError, HidFunction, RecordingTransport,
    ReportHandler, StaticCatalog,
};
use protocol::hid::ReportType;
use tracing::debug;

/// Report handler that forwards host output to the notice channel
///
/// GET_REPORT answers with the last payload the host sent, so the vendor
/// channel behaves as a loopback.
pub struct NoticeHandler {
    function: String,
    notices: Option<Sender<DeviceNotice>>,
    last_output: Option<Vec<u8>>,
}

impl NoticeHandler {
    pub fn new(function: impl Into<String>, notices: Option<Sender<DeviceNotice>>) -> Self {
        Self {
            function: function.into(),
            notices,
            last_output: None,
        }
    }

    fn post(&self, notice: DeviceNotice) {
        if let Some(tx) = &self.notices {
            if let Err(e) = common::channel::post(tx, notice) {
                debug!("{}: notice not delivered: {}", self.function, e);
            }
        }
    }
}

impl ReportHandler for NoticeHandler {
    fn on_deinit(&mut self) {
        self.last_output = None;
    }

    fn on_output_report(&mut self, data: &[u8]) -> Result<(), FunctionError> {
        self.last_output = Some(data.to_vec());
        self.post(DeviceNotice::OutputReport {
            function: self.function.clone(),
            data: data.to_vec(),
        });
        Ok(())
    }

    fn on_set_report(
        &mut self,
        _report_type: ReportType,
        report_id: u8,
        data: &[u8],
    ) -> Result<(), FunctionError> {
        self.last_output = Some(data.to_vec());
        self.post(DeviceNotice::SetReport {
            function: self.function.clone(),
            report_id,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn get_report(&mut self, _report_type: ReportType, _report_id: u8) -> Option<Vec<u8>> {
        self.last_output.clone()
    }
}

/// Register every configured function and assemble the descriptor catalog
///
/// Replays pass `None` for `notices`; the session's transport primitives do
/// not depend on it.
pub fn build_session(
    config: &SimulatorConfig,
    notices: Option<Sender<DeviceNotice>>,
) -> Result<DeviceSession<RecordingTransport>> {
    let mut router = CompositeRouter::new();
    for function in config.function_configs()? {
        let name = function.name.clone();
        let handler = NoticeHandler::new(name.clone(), notices.clone());
        let hid = HidFunction::new(function, handler)
            .with_context(|| format!("Failed to create function '{}'", name))?;
        router
            .register(Box::new(hid))
            .with_context(|| format!("Failed to register function '{}'", name))?;
    }

    let catalog = StaticCatalog::build(&config.identity(), &router)
        .context("Failed to build descriptor catalog")?;

    debug!(
        "Assembled {} function(s) over {} interface(s)",
        router.len(),
        router.num_interfaces()
    );
    Ok(DeviceSession::new(
        RecordingTransport::new(),
        Box::new(catalog),
        router,
    ))
}
