// SPDX-License-Identifier: Apache-2.0
use bulkmail::config::ConfigStore;
use bulkmail::dispatcher::send_email;

use std::env;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Uses the same record the dashboard edits
    let config = ConfigStore::from_env().load()?;

    // Get recipient from command line argument
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        eprintln!("Usage: {} <recipient_email> [first_name]", args[0]);
        std::process::exit(1);
    }
    let recipient_email = &args[1];
    let first_name = args.get(2).map(String::as_str).unwrap_or("");

    send_email(recipient_email, first_name, &config)?;
    println!("Test email sent to {}", recipient_email);

    Ok(())
}
