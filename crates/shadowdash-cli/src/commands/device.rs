use std::time::Duration;

use shadowdash_core::dashboard::{DashboardEvent, DeviceCard, Notice, NoticeKind};
use shadowdash_core::shadow::RefreshOutcome;
use shadowdash_core::{DesiredState, DeviceId};
use tokio::sync::broadcast::error::RecvError;

use crate::cli::DeviceCommands;
use crate::commands::common::{card_to_item, format_card_lines, Workspace};
use crate::error::CliError;

const TOKEN_CHECK_INTERVAL: Duration = Duration::from_secs(300);

pub async fn run_device(command: DeviceCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    let workspace = Workspace::open(global_profile).await?;
    let result = dispatch(&workspace, command).await;
    workspace.unmount();
    result
}

async fn dispatch(workspace: &Workspace, command: DeviceCommands) -> Result<(), CliError> {
    match command {
        DeviceCommands::List { json } => run_list(workspace, json).await,
        DeviceCommands::Set { id, power } => {
            let device = workspace.device(&id)?;
            workspace.mount();
            let desired = workspace.dashboard.set_power(&device, power.is_on()).await;
            report_desired(workspace, &device, desired)
        }
        DeviceCommands::Toggle { id } => {
            let device = workspace.device(&id)?;
            let mut events = workspace.mount();
            workspace
                .wait_until_loaded(&mut events, std::slice::from_ref(&device))
                .await?;
            let desired = workspace.dashboard.toggle(&device).await;
            report_desired(workspace, &device, desired)
        }
        DeviceCommands::Refresh { id } => run_refresh(workspace, &id).await,
        DeviceCommands::Watch { ids, json } => run_watch(workspace, &ids, json).await,
    }
}

async fn run_list(workspace: &Workspace, as_json: bool) -> Result<(), CliError> {
    let mut events = workspace.mount();
    workspace
        .wait_until_loaded(&mut events, workspace.dashboard.devices())
        .await?;
    print_cards(&workspace.dashboard.cards(), as_json)
}

async fn run_refresh(workspace: &Workspace, id: &str) -> Result<(), CliError> {
    let device = workspace.device(id)?;
    workspace.mount();
    let locale = workspace.profile.config.locale;

    let outcome = workspace.dashboard.refresh(&device).await?;
    match outcome {
        RefreshOutcome::Synced(reported) => {
            println!("{}", NoticeKind::ReportedSynced.message(locale));
            let power = reported
                .on
                .map_or("—", |on| if on { "ON" } else { "OFF" });
            let by = reported.by.as_deref().unwrap_or("—");
            println!("{}: reported {} by {}", device.display_name(), power, by);
            if let Some(reason) = reported.reason.as_deref() {
                println!("reason: {reason}");
            }
        }
        RefreshOutcome::NoReportedYet => {
            println!("{}", NoticeKind::NoReportedYet.message(locale));
        }
    }
    Ok(())
}

async fn run_watch(workspace: &Workspace, ids: &[String], as_json: bool) -> Result<(), CliError> {
    let filter = ids
        .iter()
        .map(|id| workspace.device(id))
        .collect::<Result<Vec<DeviceId>, CliError>>()?;
    let shown = |device: &DeviceId| filter.is_empty() || filter.contains(device);

    let mut events = workspace.mount();
    let mut token_check = tokio::time::interval(TOKEN_CHECK_INTERVAL);
    token_check.tick().await;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(DashboardEvent::CardUpdated(card)) if shown(&card.device) => {
                    print_card(&card, as_json)?;
                }
                Ok(DashboardEvent::Notice(notice)) => print_notice(&notice, as_json)?,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Skipped {} dashboard event(s)", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = token_check.tick() => {
                if let Err(error) = workspace.keep_token_fresh().await {
                    tracing::warn!("Failed to refresh session: {}", error);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

fn report_desired(
    workspace: &Workspace,
    device: &DeviceId,
    desired: shadowdash_core::Result<DesiredState>,
) -> Result<(), CliError> {
    let locale = workspace.profile.config.locale;
    match desired {
        Ok(desired) => {
            let on = desired.on.unwrap_or_default();
            let seq = desired
                .seq
                .map_or_else(|| "—".to_string(), |seq| seq.to_string());
            println!(
                "{}: {} (seq {})",
                device.display_name(),
                NoticeKind::DesiredUpdated { on }.message(locale),
                seq
            );
            Ok(())
        }
        Err(error) => {
            eprintln!("{}", NoticeKind::UpdateFailed.message(locale));
            Err(error.into())
        }
    }
}

fn print_cards(cards: &[DeviceCard], as_json: bool) -> Result<(), CliError> {
    if as_json {
        let items = cards.iter().map(card_to_item).collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for line in format_card_lines(cards) {
            println!("{line}");
        }
    }
    Ok(())
}

fn print_card(card: &DeviceCard, as_json: bool) -> Result<(), CliError> {
    if as_json {
        println!("{}", serde_json::to_string(&card_to_item(card))?);
    } else {
        println!("{}", card.render_line());
    }
    Ok(())
}

fn print_notice(notice: &Notice, as_json: bool) -> Result<(), CliError> {
    if as_json {
        println!("{}", serde_json::to_string(notice)?);
    } else {
        println!("! {}", notice.message);
    }
    Ok(())
}
