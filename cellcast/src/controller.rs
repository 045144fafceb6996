use std::cell::Cell;
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::PredictionResult;
use crate::presenter::DashboardView;
use crate::transport::{PredictionTransport, TransportError, UploadRequest};
use crate::{
    parse_future_cycles_input, SelectedFile, DEFAULT_FUTURE_CYCLES, MAX_FUTURE_CYCLES,
    MIN_FUTURE_CYCLES,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Screen {
    Upload,
    Dashboard,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UploadForm {
    file: Option<SelectedFile>,
    future_cycles: i64,
}

impl Default for UploadForm {
    fn default() -> Self {
        Self {
            file: None,
            future_cycles: DEFAULT_FUTURE_CYCLES,
        }
    }
}

impl UploadForm {
    pub fn file(&self) -> Option<&SelectedFile> {
        self.file.as_ref()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file.as_ref().map(SelectedFile::name)
    }

    pub fn future_cycles(&self) -> i64 {
        self.future_cycles
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DashboardState {
    file_name: String,
    result: PredictionResult,
}

impl DashboardState {
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn result(&self) -> &PredictionResult {
        &self.result
    }

    pub fn view(&self) -> DashboardView {
        DashboardView::from_result(&self.file_name, &self.result)
    }
}

/// The whole mutable state of the application. A prediction result only
/// exists on the dashboard and a selected file only on the upload screen.
#[derive(Clone, Debug, PartialEq)]
pub enum ViewState {
    Upload(UploadForm),
    Dashboard(DashboardState),
}

impl Default for ViewState {
    fn default() -> Self {
        ViewState::Upload(UploadForm::default())
    }
}

impl ViewState {
    pub fn screen(&self) -> Screen {
        match self {
            ViewState::Upload(_) => Screen::Upload,
            ViewState::Dashboard(_) => Screen::Dashboard,
        }
    }

    pub fn upload_form(&self) -> Option<&UploadForm> {
        match self {
            ViewState::Upload(form) => Some(form),
            ViewState::Dashboard(_) => None,
        }
    }

    pub fn dashboard(&self) -> Option<&DashboardState> {
        match self {
            ViewState::Upload(_) => None,
            ViewState::Dashboard(dashboard) => Some(dashboard),
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        match self {
            ViewState::Upload(form) => form.file_name(),
            ViewState::Dashboard(dashboard) => Some(dashboard.file_name()),
        }
    }

    pub fn prediction(&self) -> Option<&PredictionResult> {
        self.dashboard().map(DashboardState::result)
    }
}

/// Shared "request in flight" flag. Clones observe the same value.
#[derive(Clone, Debug, Default)]
pub struct LoadingFlag(Rc<Cell<bool>>);

impl LoadingFlag {
    pub fn is_loading(&self) -> bool {
        self.0.get()
    }

    fn acquire(&self) -> LoadingGuard {
        self.0.set(true);
        LoadingGuard { flag: self.clone() }
    }
}

/// Holds the loading flag up; dropping it on any path clears the flag.
#[derive(Debug)]
pub struct LoadingGuard {
    flag: LoadingFlag,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.flag.0.set(false);
    }
}

/// A submission whose request has been handed to the transport.
#[derive(Debug)]
pub struct PendingSubmission {
    file_name: String,
    _loading: LoadingGuard,
}

impl PendingSubmission {
    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no file selected")]
    NoFileSelected,
    #[error("future cycles must be between 1 and 500, got {0}")]
    CyclesOutOfRange(i64),
    #[error("a prediction is already in flight")]
    Busy,
    #[error("submissions are only accepted from the upload screen")]
    NotInUpload,
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SubmitError {
    /// Text shown to the user. Transport failures collapse into one message;
    /// the detailed error only goes to the log.
    pub fn user_message(&self) -> String {
        match self {
            SubmitError::Validation(ValidationError::NoFileSelected) => {
                "Please select a file first".to_string()
            }
            SubmitError::Validation(ValidationError::CyclesOutOfRange(_)) => format!(
                "Please enter a number between {MIN_FUTURE_CYCLES} and {MAX_FUTURE_CYCLES} for future cycles"
            ),
            SubmitError::Validation(ValidationError::Busy) => {
                "A prediction is already running".to_string()
            }
            SubmitError::Validation(ValidationError::NotInUpload) => {
                "Start a new prediction first".to_string()
            }
            SubmitError::Transport(_) => "Prediction failed, check server console".to_string(),
        }
    }
}

/// Owns the view state and drives Upload -> Dashboard -> Upload.
pub struct Controller<T> {
    transport: T,
    state: ViewState,
    loading: LoadingFlag,
}

impl<T: PredictionTransport> Controller<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: ViewState::default(),
            loading: LoadingFlag::default(),
        }
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn screen(&self) -> Screen {
        self.state.screen()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_loading(&self) -> bool {
        self.loading.is_loading()
    }

    pub fn loading_flag(&self) -> LoadingFlag {
        self.loading.clone()
    }

    pub fn future_cycles(&self) -> Option<i64> {
        self.state.upload_form().map(UploadForm::future_cycles)
    }

    pub fn dashboard_view(&self) -> Option<DashboardView> {
        self.state.dashboard().map(DashboardState::view)
    }

    pub fn select_file(&mut self, file: SelectedFile) -> &ViewState {
        match &mut self.state {
            ViewState::Upload(form) => {
                debug!(file = file.name(), bytes = file.len(), "file selected");
                form.file = Some(file);
            }
            ViewState::Dashboard(_) => {
                debug!(file = file.name(), "ignoring file selection outside the upload screen");
            }
        }
        &self.state
    }

    /// Store the cycle count as given; the range is checked on submit.
    pub fn set_future_cycles(&mut self, cycles: i64) -> &ViewState {
        if let ViewState::Upload(form) = &mut self.state {
            form.future_cycles = cycles;
        }
        &self.state
    }

    /// Text-field entry: non-numeric or out-of-range input becomes the default.
    pub fn input_future_cycles(&mut self, raw: &str) -> &ViewState {
        self.set_future_cycles(parse_future_cycles_input(raw))
    }

    /// Validate the form and raise the loading flag. The returned request is
    /// meant for exactly one transport call; the pending half must be handed
    /// back to [`Controller::finish_submission`].
    pub fn prepare_submission(
        &mut self,
    ) -> Result<(UploadRequest, PendingSubmission), ValidationError> {
        let ViewState::Upload(form) = &self.state else {
            return Err(ValidationError::NotInUpload);
        };
        if self.loading.is_loading() {
            return Err(ValidationError::Busy);
        }
        let Some(file) = form.file.as_ref() else {
            return Err(ValidationError::NoFileSelected);
        };
        let future_cycles = u32::try_from(form.future_cycles)
            .ok()
            .filter(|n| (MIN_FUTURE_CYCLES..=MAX_FUTURE_CYCLES).contains(&i64::from(*n)))
            .ok_or(ValidationError::CyclesOutOfRange(form.future_cycles))?;

        info!(file = file.name(), future_cycles, "submitting prediction");
        let pending = PendingSubmission {
            file_name: file.name().to_string(),
            _loading: self.loading.acquire(),
        };
        let request = UploadRequest {
            file: file.clone(),
            future_cycles,
        };
        Ok((request, pending))
    }

    pub fn finish_submission(
        &mut self,
        pending: PendingSubmission,
        outcome: Result<PredictionResult, TransportError>,
    ) -> Result<&ViewState, SubmitError> {
        let PendingSubmission {
            file_name,
            _loading,
        } = pending;
        match outcome {
            Ok(result) => {
                info!(
                    file = %file_name,
                    points = result.predictions.len(),
                    insights = result.insights().len(),
                    "prediction received"
                );
                self.state = ViewState::Dashboard(DashboardState { file_name, result });
                drop(_loading);
                Ok(&self.state)
            }
            Err(err) => {
                warn!(file = %file_name, error = %err, "prediction failed");
                drop(_loading);
                Err(SubmitError::Transport(err))
            }
        }
    }

    /// Validate, send one request and apply its outcome.
    pub async fn submit(&mut self) -> Result<&ViewState, SubmitError> {
        let (request, pending) = self.prepare_submission()?;
        let outcome = self.transport.submit_prediction(request).await;
        self.finish_submission(pending, outcome)
    }

    /// Drop the result and start over with an empty form.
    pub fn reset(&mut self) -> &ViewState {
        if self.state.screen() == Screen::Dashboard {
            info!("starting a new prediction");
        }
        self.state = ViewState::default();
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Prediction;
    use async_trait::async_trait;
    use std::cell::RefCell;

    /// Records every request and checks the loading flag while "on the wire".
    struct FakeTransport {
        reply: RefCell<Option<Result<PredictionResult, TransportError>>>,
        requests: RefCell<Vec<UploadRequest>>,
        loading_seen: RefCell<Vec<bool>>,
        flag: RefCell<Option<LoadingFlag>>,
    }

    impl FakeTransport {
        fn replying(reply: Result<PredictionResult, TransportError>) -> Self {
            Self {
                reply: RefCell::new(Some(reply)),
                requests: RefCell::new(Vec::new()),
                loading_seen: RefCell::new(Vec::new()),
                flag: RefCell::new(None),
            }
        }
    }

    #[async_trait(?Send)]
    impl PredictionTransport for FakeTransport {
        async fn submit_prediction(
            &self,
            request: UploadRequest,
        ) -> Result<PredictionResult, TransportError> {
            if let Some(flag) = self.flag.borrow().as_ref() {
                self.loading_seen.borrow_mut().push(flag.is_loading());
            }
            self.requests.borrow_mut().push(request);
            self.reply
                .borrow_mut()
                .take()
                .expect("fake transport called more than once")
        }
    }

    fn sample_result() -> PredictionResult {
        PredictionResult::from_json(
            r#"{"predictions":[{"cycle":1,"capacity":5.0},{"cycle":2,"capacity":4.5}],
                "meta":{"insights":["Avoid full discharge"]}}"#,
        )
        .unwrap()
    }

    fn controller(reply: Result<PredictionResult, TransportError>) -> Controller<FakeTransport> {
        let controller = Controller::new(FakeTransport::replying(reply));
        *controller.transport().flag.borrow_mut() = Some(controller.loading_flag());
        controller
    }

    fn csv_file() -> SelectedFile {
        SelectedFile::new("cell.csv", b"cycle,capacity\n".to_vec()).unwrap()
    }

    #[test]
    fn starts_on_upload_with_defaults() {
        let c = controller(Ok(sample_result()));
        assert_eq!(c.screen(), Screen::Upload);
        assert_eq!(c.future_cycles(), Some(DEFAULT_FUTURE_CYCLES));
        assert_eq!(c.state().file_name(), None);
        assert!(c.state().prediction().is_none());
        assert!(!c.is_loading());
    }

    #[tokio::test]
    async fn successful_submit_moves_to_dashboard() {
        let mut c = controller(Ok(sample_result()));
        c.select_file(csv_file());
        c.set_future_cycles(120);
        let state = c.submit().await.unwrap();
        assert_eq!(state.screen(), Screen::Dashboard);
        assert_eq!(state.prediction(), Some(&sample_result()));
        assert_eq!(state.file_name(), Some("cell.csv"));

        let requests = c.transport().requests.borrow();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].future_cycles, 120);
        assert_eq!(requests[0].file.name(), "cell.csv");
        assert_eq!(*c.transport().loading_seen.borrow(), vec![true]);
        assert!(!c.is_loading());
    }

    #[tokio::test]
    async fn out_of_range_cycles_send_nothing() {
        for cycles in [0, 501, -3] {
            let mut c = controller(Ok(sample_result()));
            c.select_file(csv_file());
            c.set_future_cycles(cycles);
            let err = c.submit().await.unwrap_err();
            assert!(matches!(
                err,
                SubmitError::Validation(ValidationError::CyclesOutOfRange(n)) if n == cycles
            ));
            assert_eq!(
                err.user_message(),
                "Please enter a number between 1 and 500 for future cycles"
            );
            assert_eq!(c.screen(), Screen::Upload);
            assert!(c.transport().requests.borrow().is_empty());
            assert!(!c.is_loading());
        }
    }

    #[tokio::test]
    async fn range_edges_are_accepted() {
        for cycles in [1, 500] {
            let mut c = controller(Ok(sample_result()));
            c.select_file(csv_file());
            c.set_future_cycles(cycles);
            c.submit().await.unwrap();
            assert_eq!(c.transport().requests.borrow()[0].future_cycles as i64, cycles);
        }
    }

    #[tokio::test]
    async fn submit_without_file_is_rejected() {
        let mut c = controller(Ok(sample_result()));
        let err = c.submit().await.unwrap_err();
        assert!(matches!(err, SubmitError::Validation(ValidationError::NoFileSelected)));
        assert_eq!(err.user_message(), "Please select a file first");
        assert!(c.transport().requests.borrow().is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_reported_before_bad_range() {
        let mut c = controller(Ok(sample_result()));
        c.set_future_cycles(0);
        let err = c.submit().await.unwrap_err();
        assert!(matches!(err, SubmitError::Validation(ValidationError::NoFileSelected)));
    }

    #[tokio::test]
    async fn transport_failure_stays_on_upload_and_clears_loading() {
        let mut c = controller(Err(TransportError::Status {
            status: 500,
            body: "model crashed".into(),
        }));
        c.select_file(csv_file());
        let err = c.submit().await.unwrap_err();
        assert!(matches!(err, SubmitError::Transport(TransportError::Status { status: 500, .. })));
        assert_eq!(err.user_message(), "Prediction failed, check server console");
        assert_eq!(c.screen(), Screen::Upload);
        assert_eq!(c.state().file_name(), Some("cell.csv"));
        assert!(c.state().prediction().is_none());
        assert_eq!(*c.transport().loading_seen.borrow(), vec![true]);
        assert!(!c.is_loading());
    }

    #[test]
    fn loading_is_held_until_the_submission_is_finished() {
        let mut c = controller(Ok(sample_result()));
        c.select_file(csv_file());
        let (_request, pending) = c.prepare_submission().unwrap();
        assert!(c.is_loading());
        assert_eq!(c.prepare_submission().unwrap_err(), ValidationError::Busy);
        c.finish_submission(pending, Ok(sample_result())).unwrap();
        assert!(!c.is_loading());
    }

    #[test]
    fn abandoned_submission_releases_loading() {
        let mut c = controller(Ok(sample_result()));
        c.select_file(csv_file());
        let (_request, pending) = c.prepare_submission().unwrap();
        assert!(c.is_loading());
        drop(pending);
        assert!(!c.is_loading());
        assert_eq!(c.screen(), Screen::Upload);
    }

    #[tokio::test]
    async fn reset_restores_a_fresh_upload_form() {
        let mut c = controller(Ok(sample_result()));
        c.select_file(csv_file());
        c.set_future_cycles(200);
        c.submit().await.unwrap();
        let state = c.reset();
        assert_eq!(state, &ViewState::default());
        assert_eq!(c.future_cycles(), Some(50));
        assert_eq!(c.state().file_name(), None);
        assert!(c.state().prediction().is_none());
    }

    #[tokio::test]
    async fn file_selection_is_ignored_on_dashboard() {
        let mut c = controller(Ok(sample_result()));
        c.select_file(csv_file());
        c.submit().await.unwrap();
        let other = SelectedFile::new("other.xlsx", vec![0x50, 0x4b]).unwrap();
        let state = c.select_file(other);
        assert_eq!(state.screen(), Screen::Dashboard);
        assert_eq!(state.file_name(), Some("cell.csv"));
        let err = c.prepare_submission().unwrap_err();
        assert_eq!(err, ValidationError::NotInUpload);
    }

    #[test]
    fn text_input_uses_fallback() {
        let mut c = controller(Ok(sample_result()));
        c.input_future_cycles("75");
        assert_eq!(c.future_cycles(), Some(75));
        c.input_future_cycles("lots");
        assert_eq!(c.future_cycles(), Some(50));
        c.input_future_cycles("900");
        assert_eq!(c.future_cycles(), Some(50));
    }

    #[tokio::test]
    async fn dashboard_view_is_derived_from_the_result() {
        let mut c = controller(Ok(PredictionResult {
            predictions: vec![Prediction { cycle: 3, capacity: 2.0 }],
            ..Default::default()
        }));
        assert!(c.dashboard_view().is_none());
        c.select_file(csv_file());
        c.submit().await.unwrap();
        let view = c.dashboard_view().unwrap();
        assert_eq!(view.file_name, "cell.csv");
        assert_eq!(view.points.len(), 1);
    }
}
