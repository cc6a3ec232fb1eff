pub mod credential;
pub mod keygen;
pub mod ledger;
pub mod migrate;
pub mod run;
pub mod workflow;

// Re-export command handlers
pub use credential::CredentialCommand;
pub use keygen::KeygenCommand;
pub use ledger::LedgerCommand;
pub use migrate::MigrateCommand;
pub use run::RunCommand;
pub use workflow::WorkflowCommand;
