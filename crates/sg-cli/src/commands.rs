use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use sg_cli::settings::Settings;
use sg_companion::config::SERVICE_CHECK_INTERVAL;
use sg_companion::{
    ProcessControl, RestartOutcome, ServiceController, ServiceError, ServiceHandle, ServiceState,
    ServiceStatus, TerminationOutcome,
};
use sg_updater::{
    CompanionInstaller, DownloadProgress, InstallError, UpdateCheck, UpdateError, Updater,
    format_bytes, format_speed,
};

use crate::cli::{ServiceCommand, UpdateArgs};

pub async fn run_check(settings: &Settings) -> Result<()> {
    let updater = Updater::new(settings.updater.clone()).map_err(update_error)?;
    let check = updater.check_for_update().await.map_err(update_error)?;
    print_check(&check);
    Ok(())
}

pub async fn run_update(settings: &Settings, args: &UpdateArgs) -> Result<()> {
    let mut updater = Updater::new(settings.updater.clone()).map_err(update_error)?;
    if let Some(dest) = &args.dest {
        updater = updater.with_download_dir(dest);
    }

    let check = updater.check_for_update().await.map_err(update_error)?;
    if !check.available {
        println!("StreamGo {} is up to date.", check.current_version);
        return Ok(());
    }
    println!(
        "Downloading StreamGo {} (running {})",
        check.latest_version, check.current_version
    );

    let bar = download_bar();
    let result = updater
        .start_update_download(|progress| show_progress(&bar, progress))
        .await;
    bar.finish_and_clear();
    let report = result.map_err(update_error)?;
    println!(
        "Verified {} ({}, sha256 {})",
        report.path.display(),
        format_bytes(report.bytes),
        report.sha256
    );

    if args.download_only {
        return Ok(());
    }
    if !args.yes {
        let question = format!(
            "Install StreamGo {} now? This command exits while the installer runs. [y/N] ",
            check.latest_version
        );
        if !confirm(&question)? {
            println!("Update left at {}", report.path.display());
            return Ok(());
        }
    }

    match updater.install_and_restart().await {
        Ok(never) => match never {},
        Err(UpdateError::InstallFailed(InstallError::ManualInstallRequired { artifact })) => {
            println!(
                "StreamGo was installed by a package manager. Install {} manually.",
                artifact.display()
            );
            Ok(())
        }
        Err(err) => Err(update_error(err)),
    }
}

pub async fn run_service(settings: &Settings, command: ServiceCommand) -> Result<()> {
    let mut controller =
        ServiceController::system(settings.companion.clone()).map_err(service_error)?;

    match command {
        ServiceCommand::Status => print_status(&controller.status().await),
        ServiceCommand::Start => {
            let handle = controller.start().await.map_err(service_error)?;
            print_handle(&handle);
        }
        ServiceCommand::Stop => stop(&mut controller).await,
        ServiceCommand::Restart => match controller.restart().await.map_err(service_error)? {
            RestartOutcome::Restarted(handle) => print_handle(&handle),
            RestartOutcome::KeptRunning(_) => println!(
                "The companion service was not started by streamgo and was not restarted. \
                 Use `streamgo service kill-all` first to replace it."
            ),
        },
        ServiceCommand::KillAll => {
            controller.force_terminate_all().await;
            println!("All companion processes stopped.");
        }
        ServiceCommand::Watch => watch(&mut controller).await?,
        ServiceCommand::Install { yes } => install(settings, &mut controller, yes).await?,
    }
    Ok(())
}

/// Install the companion when no copy is found, then start it.
async fn install<C: ProcessControl>(
    settings: &Settings,
    controller: &mut ServiceController<C>,
    yes: bool,
) -> Result<()> {
    if let Ok(found) = controller.locate() {
        println!(
            "Companion service already installed at {}",
            found.path.display()
        );
        return Ok(());
    }

    let installer = CompanionInstaller::new(
        &settings.updater,
        settings.companion_install.clone(),
        settings.companion.layout.clone(),
    )
    .map_err(update_error)?;
    if !yes && !confirm("The companion service is not installed. Download and install it? [y/N] ")? {
        return Ok(());
    }

    let bar = download_bar();
    let result = installer
        .download(|progress| show_progress(&bar, progress))
        .await;
    bar.finish_and_clear();
    let download = result.map_err(update_error)?;
    println!(
        "Downloaded {} {} ({})",
        download.package.file_name(),
        download.tag,
        format_bytes(download.report.bytes)
    );
    println!("Installing; the system may ask for an administrator password.");

    let installed = installer.install(&download).await.map_err(update_error)?;
    println!("Installed companion service at {}", installed.display());

    match controller.start().await {
        Ok(handle) => print_handle(&handle),
        Err(error) => {
            warn!(%error, "companion installed but not started");
            println!("The companion service was installed but could not be started: {error}");
        }
    }
    Ok(())
}

async fn stop<C: ProcessControl>(controller: &mut ServiceController<C>) {
    if controller.probe().await == ServiceState::RunningExternal {
        println!(
            "The companion service was not started by streamgo and is left running. \
             Use `streamgo service kill-all` to stop it anyway."
        );
        return;
    }
    match controller.terminate().await {
        TerminationOutcome::Terminated => println!("Companion service stopped."),
        TerminationOutcome::NotRunning => println!("Companion service is not running."),
        TerminationOutcome::Skipped(_) => println!("Companion service left running."),
        TerminationOutcome::Failed(reason) => println!("Could not stop the companion: {reason}"),
    }
}

/// Keep the companion up until Ctrl-C, then stop it if we started it.
async fn watch<C: ProcessControl>(controller: &mut ServiceController<C>) -> Result<()> {
    let handle = controller.start().await.map_err(service_error)?;
    print_handle(&handle);

    let mut ticker = tokio::time::interval(SERVICE_CHECK_INTERVAL);
    ticker.tick().await;
    let mut last = controller.status().await;
    println!("{}", status_line(&last));

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("listen for Ctrl-C")?;
                break;
            }
            _ = ticker.tick() => {}
        }

        let status = controller.status().await;
        if status != last {
            info!(running = status.running, pid = ?status.pid, "companion status changed");
            println!("{}", status_line(&status));
        }
        if !status.running {
            warn!("companion service is down, starting it again");
            match controller.start().await {
                Ok(handle) => print_handle(&handle),
                Err(error) => warn!(%error, "could not restart companion service"),
            }
        }
        last = status;
    }

    match controller.shutdown().await {
        TerminationOutcome::Terminated => println!("Stopped the companion service."),
        TerminationOutcome::Skipped(_) => {
            println!("Left the companion service running; streamgo did not start it.");
        }
        TerminationOutcome::NotRunning => {}
        TerminationOutcome::Failed(reason) => {
            println!("Could not stop the companion service: {reason}");
        }
    }
    Ok(())
}

fn print_check(check: &UpdateCheck) {
    if check.available {
        println!(
            "Update available: {} -> {}",
            check.current_version, check.latest_version
        );
        if let Some(published) = check.published_at {
            println!("Published: {}", published.format("%Y-%m-%d"));
        }
        if let Some(url) = &check.page_url {
            println!("Release page: {url}");
        }
        if let Some(notes) = check.notes.as_deref().filter(|n| !n.trim().is_empty()) {
            println!();
            println!("{}", notes.trim());
        }
    } else {
        println!(
            "StreamGo {} is up to date (latest {}).",
            check.current_version, check.latest_version
        );
    }
}

fn print_status(status: &ServiceStatus) {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Running"),
        header_cell("Bundled"),
        header_cell("Started by us"),
        header_cell("PID"),
    ]);
    apply_table_style(&mut table);
    table.add_row(vec![
        flag_cell(status.running),
        flag_cell(status.bundled),
        flag_cell(status.started_by_us),
        Cell::new(status.pid.map_or_else(|| "-".to_string(), |pid| pid.to_string())),
    ]);
    println!("{table}");
}

fn print_handle(handle: &ServiceHandle) {
    let pid = handle
        .pid
        .map_or_else(|| "unknown".to_string(), |pid| pid.to_string());
    if handle.started_by_us {
        println!(
            "Started {} companion {} (pid {pid})",
            handle.origin,
            handle.executable_path.display()
        );
    } else {
        println!("Companion service already running (pid {pid})");
    }
}

fn status_line(status: &ServiceStatus) -> String {
    match (status.running, status.pid) {
        (true, Some(pid)) => format!("companion running, pid {pid}"),
        (true, None) => "companion running".to_string(),
        (false, _) => "companion not running".to_string(),
    }
}

fn download_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template(
        "{spinner:.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");
    bar.set_style(style);
    bar
}

fn show_progress(bar: &ProgressBar, progress: &DownloadProgress) {
    if progress.total > 0 {
        bar.set_length(progress.total);
    }
    bar.set_position(progress.downloaded);
    let speed = format_speed(progress.speed);
    if progress.attempt > 1 {
        bar.set_message(format!("{speed} (attempt {})", progress.attempt));
    } else {
        bar.set_message(speed);
    }
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question}");
    io::stdout().flush().context("flush stdout")?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("read confirmation")?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes" | "Yes"))
}

fn update_error(err: UpdateError) -> anyhow::Error {
    let hint = err.user_message().to_string();
    anyhow::Error::new(err).context(hint)
}

fn service_error(err: ServiceError) -> anyhow::Error {
    let hint = match &err {
        ServiceError::NotFound { .. } => {
            "The streaming service is not installed. Run `streamgo service install` to install it."
                .to_string()
        }
        _ => err.user_message().to_string(),
    };
    anyhow::Error::new(err).context(hint)
}

fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
}

fn header_cell(label: &str) -> Cell {
    Cell::new(label)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

fn flag_cell(value: bool) -> Cell {
    if value {
        Cell::new("yes").fg(Color::Green)
    } else {
        Cell::new("no").fg(Color::DarkGrey)
    }
}
