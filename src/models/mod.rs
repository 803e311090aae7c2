pub mod analysis;
pub mod options;
pub mod question;
pub mod record;
pub mod session;

pub use analysis::{AnalysisResponse, Importance, StudyPoint, UnitAnalysis};
pub use options::{Difficulty, Language};
pub use question::{AnswerTag, QuestionRecord, QuestionType, RawQuestion};
pub use record::{CumulativeRecord, LabeledText, RecordMetadata, RecordPayload};
pub use session::{DocumentSession, Progress, SessionKey, SessionState, UnitState};
