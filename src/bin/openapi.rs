use anyhow::Result;
use serde_json::json;

fn main() -> Result<()> {
    let doc = json!({
        "verification": sshauth::api::openapi(),
        "consumer": sshauth::consumer::openapi(),
    });
    let json = serde_json::to_string_pretty(&doc)?;
    println!("{json}");
    Ok(())
}
