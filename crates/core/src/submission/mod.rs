pub mod assembler;
pub mod submitter;

pub use assembler::{assemble, split_unit, AssemblyError};
pub use submitter::{
    next_section_number, section_format, section_name, section_rows, InventorySubmitter,
    SubmissionError, SubmissionReceipt, SubmissionStage,
};
