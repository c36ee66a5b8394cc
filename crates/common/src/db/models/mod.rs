//! SeaORM entity models

mod form_submission;
mod report_record;

pub use report_record::{
    Entity as ReportRecordEntity,
    Model as ReportRecordModel,
    Column as ReportRecordColumn,
};

pub use form_submission::{
    Entity as FormSubmissionEntity,
    Model as FormSubmission,
    Column as FormSubmissionColumn,
};
