#!/usr/bin/env cargo
//! Development token issuer for SupportChat
//!
//! Signs an HS256 access token with `JWT_SECRET` so a local client can connect without an
//! identity provider.
//!
//! Usage:
//!   cargo run --bin issue-token -- customer
//!   cargo run --bin issue-token -- admin 6f1c0d7e-5b8a-4a57-9d0e-1f2a3b4c5d6e
//!
//! The user id defaults to a fresh random UUID.

use std::env;
use supportchat_api::auth::JwtManager;
use supportchat_api::config::MAX_JWT_EXPIRY_HOURS;
use supportchat_shared::Role;
use uuid::Uuid;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let mut args = env::args().skip(1);
    let role: Role = match args.next() {
        Some(raw) => raw
            .parse()
            .map_err(|_| format!("Unknown role '{}': expected customer or admin", raw))?,
        None => {
            eprintln!("Usage: issue-token <customer|admin> [user-id]");
            std::process::exit(1);
        }
    };
    let user_id = match args.next() {
        Some(raw) => Uuid::parse_str(&raw).map_err(|e| format!("Invalid user id: {}", e))?,
        None => Uuid::new_v4(),
    };

    let secret = env::var("JWT_SECRET").map_err(|_| "JWT_SECRET must be set")?;
    if secret.len() < 32 {
        eprintln!("Warning: JWT_SECRET is shorter than 32 characters; the server will refuse it.");
    }
    let expiry_hours = env::var("JWT_EXPIRY_HOURS")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|hours| (1..=MAX_JWT_EXPIRY_HOURS).contains(hours))
        .unwrap_or(24);

    let (token, jti) = JwtManager::new(&secret, expiry_hours).generate_token(user_id, role)?;

    println!("\n===========================================");
    println!("Access token ({}, {} h):", role, expiry_hours);
    println!("===========================================");
    println!("{}", token);
    println!("===========================================\n");

    println!("user_id: {}", user_id);
    println!("jti:     {}", jti);
    println!("\nConnect with:");
    println!("  ws://localhost:3000/api/v1/ws/chat?token={}", token);

    Ok(())
}
