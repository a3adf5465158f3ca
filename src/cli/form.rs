//! `tripctl form` command implementation

use anyhow::Result;
use clap::Subcommand;

use crate::store::{Storage, TripStore};

#[derive(Subcommand)]
pub enum FormCommand {
    /// Print the last submitted trip form
    Show,
    /// Forget the last submitted trip form
    Clear,
}

pub fn run(profile: &str, command: FormCommand) -> Result<()> {
    let store = TripStore::new(Storage::new(profile)?);

    match command {
        FormCommand::Show => match store.form_data() {
            Some(form) => println!("{}", serde_json::to_string_pretty(&form)?),
            None => println!("No saved trip form in profile '{}'", profile),
        },
        FormCommand::Clear => {
            store.clear_form_data()?;
            println!("✓ Cleared saved trip form (profile '{}')", profile);
        }
    }

    Ok(())
}
