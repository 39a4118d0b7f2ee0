//! Server Connection Parameters Generator
//!
//! Generates a new Ed25519 server identity and the DER connection parameters
//! that let clients import it.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin generate_connection_params -- [internet-address]
//! ```
//!
//! ## Output
//!
//! - Server private key (base64) - keep it secret
//! - Server node id (hex)
//! - Connection parameters (base64) - for `gateway.connection_params_base64`

use base64::{engine::general_purpose, Engine as _};
use letro_core::gateway::loopback::{connection_params_for, derive_node_id, generate_signing_key};

fn main() -> anyhow::Result<()> {
    let internet_address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "letro.localhost".to_string());

    let signing_key = generate_signing_key();
    let params = connection_params_for(&signing_key, &internet_address)?;

    println!("=== Letro Server Connection Parameters ===");
    println!();
    println!("Internet address: {}", internet_address);
    println!(
        "Private key (base64): {}",
        general_purpose::STANDARD.encode(signing_key.as_bytes())
    );
    println!(
        "Node id: {}",
        derive_node_id(signing_key.verifying_key().as_bytes())
    );
    println!();
    println!("Connection parameters (base64):");
    println!("{}", general_purpose::STANDARD.encode(&params));
    println!();
    println!("Add to config/letro-core.toml:");
    println!("  [gateway]");
    println!(
        "  connection_params_base64 = \"{}\"",
        general_purpose::STANDARD.encode(&params)
    );

    Ok(())
}
