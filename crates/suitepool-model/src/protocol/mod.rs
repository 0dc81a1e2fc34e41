mod message;
pub use message::Message;

mod event;
pub use event::{
    FeatureInfo, ResultEvent, ScenarioInfo, Speed, StepInfo, StepStatus, TestFailure, TestInfo,
};
