use anyhow::Result;
use clap::Parser;
use report_forge::cli::Args;
use report_forge::controller::RunController;
use report_forge::controller::events::ProgressEvent;
use report_forge::generator::context::Services;
use report_forge::generator::workflow::state::RunState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    let request = args.to_request()?;
    let config = args.into_config()?;

    tracing_subscriber::fmt()
        .with_max_level(if config.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .with_writer(std::io::stderr)
        .init();

    let models = config.load_models()?;
    let services = Services::from_config(&config)?;
    let controller = RunController::new(config, models, services);

    let handle = controller.start(request)?;
    let mut events = handle.subscribe().await;

    let cancel_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("🛑 收到中断信号，正在取消...");
            cancel_handle.cancel();
        }
    });

    while let Some(event) = events.recv().await {
        match event {
            ProgressEvent::Output(line) => println!("{}", line),
            ProgressEvent::Complete(files) => {
                println!("\n🎉 报告生成完成");
                for file in files {
                    println!("   {}", file.display());
                }
            }
            ProgressEvent::Error(message) => eprintln!("\n❌ {}", message),
        }
    }

    match handle.wait().await {
        RunState::Completed => Ok(()),
        state => std::process::exit(if state == RunState::Cancelled { 130 } else { 1 }),
    }
}
