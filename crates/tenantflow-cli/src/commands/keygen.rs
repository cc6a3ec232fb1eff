//! Master key generation

use crate::{error::CliResult, utils::ColoredOutput};
use tenantflow_store::cipher::MASTER_KEY_ENV;
use tenantflow_store::SecretCipher;

pub struct KeygenCommand;

impl KeygenCommand {
    pub fn run() -> CliResult<()> {
        let key = SecretCipher::generate_master_key_hex();
        eprintln!(
            "{}",
            ColoredOutput::dim(&format!("Store this key securely and export it as {}", MASTER_KEY_ENV))
        );
        println!("{}", key);
        Ok(())
    }
}
