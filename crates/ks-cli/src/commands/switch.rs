//! status / activate / deactivate / logs
//!
//! Every path goes through `KillSwitchService`: same gate, same
//! compare-and-set as the daemon. `--principal-id` is taken as given; whoever
//! holds the database credentials is already trusted with the switch.

use anyhow::Result;
use ks_schemas::{Principal, StatusView};

use super::{opt_dt, principal_for, transport_details, Context};

fn print_status(view: &StatusView) {
    println!("engaged={}", view.engaged);
    println!("activated_at={}", opt_dt(&view.activated_at));
    println!("activated_by={}", view.activated_by.as_deref().unwrap_or(""));
    println!("reason={}", view.reason.as_deref().unwrap_or(""));
    println!("affected_systems={}", view.affected_systems.join(","));
    println!("last_checked={}", view.last_checked.to_rfc3339());
}

pub async fn status(ctx: &Context, principal_id: &str) -> Result<()> {
    let (svc, _) = ctx.service().await?;
    svc.authorize(&Principal::new(principal_id.trim(), None))?;
    print_status(&svc.get_status().await?);
    Ok(())
}

pub async fn activate(
    ctx: &Context,
    principal_id: &str,
    label: Option<String>,
    reason: &str,
) -> Result<()> {
    let (svc, cfg) = ctx.service().await?;
    let view = svc
        .activate_with_details(
            &principal_for(&cfg, principal_id, label),
            reason,
            Some(transport_details()),
        )
        .await?;
    print_status(&view);
    Ok(())
}

pub async fn deactivate(
    ctx: &Context,
    principal_id: &str,
    label: Option<String>,
    reason: Option<&str>,
) -> Result<()> {
    let (svc, cfg) = ctx.service().await?;
    let view = svc
        .deactivate_with_details(
            &principal_for(&cfg, principal_id, label),
            reason,
            Some(transport_details()),
        )
        .await?;
    print_status(&view);
    Ok(())
}

pub async fn logs(ctx: &Context, principal_id: &str, limit: Option<u32>) -> Result<()> {
    let (svc, _) = ctx.service().await?;
    svc.authorize(&Principal::new(principal_id.trim(), None))?;

    let logs = svc.get_logs(limit).await?;
    for view in &logs {
        println!("{}", serde_json::to_string(view)?);
    }
    println!("total={}", logs.len());
    Ok(())
}
