// Command handlers shared by the CLI and library consumers

pub mod research;

pub use research::{
    ResearchService, ResearchStatusReport, StartResearchRequest, StartedRun, WORKER_AGENT_NAME,
};
