use std::{sync::Arc, time::Duration};

use teloxide::Bot;
use tracing::info;

use vkpub_core::{
    config::Config,
    conversation::{App, AppDeps},
    media::MediaAcquirer,
    scheduler::JobScheduler,
};
use vkpub_ffmpeg::FfmpegTranscoder;
use vkpub_sqlite::SqliteStore;
use vkpub_telegram::{TelegramMediaSource, TelegramMessenger};
use vkpub_vk::VkClient;

/// How long in-flight publish jobs may run after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), vkpub_core::Error> {
    vkpub_core::logging::init("vkpub")?;

    let cfg = Arc::new(Config::load()?);
    cfg.ensure_temp_dir()?;
    if !cfg.oauth_configured() {
        tracing::warn!("CLIENT_ID is not set; /get_access_token will fail");
    }

    let store = Arc::new(SqliteStore::open(&cfg.database_url).await?);
    let vk = Arc::new(VkClient::from_config(&cfg)?);
    let bot = Bot::new(cfg.bot_token.clone());

    let acquirer = Arc::new(MediaAcquirer::new(
        Arc::new(TelegramMediaSource::new(bot.clone())),
        Arc::new(FfmpegTranscoder::new(&cfg.ffmpeg_path, &cfg.ffprobe_path)),
        cfg.temp_dir.clone(),
        cfg.download,
    ));
    let scheduler = JobScheduler::new(cfg.timezone);

    let app = Arc::new(App::new(AppDeps {
        config: cfg.clone(),
        store,
        messenger: Arc::new(TelegramMessenger::new(bot.clone())),
        platform: vk.clone(),
        identity: vk,
        acquirer,
        scheduler: scheduler.clone(),
    }));

    app.bootstrap_admins().await;
    app.install_housekeeping().await;
    scheduler.start().await;

    let polled = vkpub_telegram::router::run_polling(bot, app).await;

    info!("polling stopped, draining scheduler");
    scheduler.shutdown(SHUTDOWN_GRACE).await;

    polled.map_err(|e| vkpub_core::Error::External(format!("telegram bot failed: {e}")))
}
