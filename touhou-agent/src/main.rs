use std::os::raw::c_int;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use burn::backend::{Autodiff, NdArray};
use dotenv::dotenv;
use lazy_static::lazy_static;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use ql::learn::agent::DqnAgent;
use ql::learn::trainer::Trainer;
use ql::log::init_logging;
use ql::ml_model::burn_model::adam_q_model;
use touhou_agent::capture::Observation;
use touhou_agent::config::Config;
use touhou_agent::device::SystemClock;
use touhou_agent::environment::{Devices, TouhouEnvironment};
use touhou_agent::platform::xorg::X11Session;
use touhou_agent::templates::ReferenceImages;

type Backend = Autodiff<NdArray>;

lazy_static! {
    static ref STOP_SIGNAL: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
}

extern "C" fn request_stop(_signal: c_int) { STOP_SIGNAL.store(true, Ordering::Relaxed); }

/// SIGINT and SIGTERM end the training after the current step
fn install_stop_handler() -> Result<Arc<AtomicBool>> {
    let stop = Arc::clone(&STOP_SIGNAL);
    let action = SigAction::new(SigHandler::Handler(request_stop), SaFlags::empty(), SigSet::empty());
    for s in [Signal::SIGINT, Signal::SIGTERM] {
        unsafe { signal::sigaction(s, &action) }.with_context(|| format!("failed to install {} handler", s))?;
    }
    Ok(stop)
}

fn main() -> Result<()> {
    dotenv().ok();
    init_logging();

    let config = Config::from_env()?;
    log::info!("configuration: {:?}", config);
    let references = ReferenceImages::load(&config.image_dir)?;
    let stop = install_stop_handler()?;

    let session = X11Session::open()?;
    let devices = Devices {
        pixels: Box::new(session.screen_capture()),
        input: Box::new(session.keyboard()),
        focus: Box::new(session.window_focus()),
        clock: Rc::new(SystemClock),
    };
    let environment = TouhouEnvironment::new(&config, &references, devices)?;

    let device = Default::default();
    let network = config.network_config();
    let learning_rate = config.learning.learning_rate;
    let mut agent = DqnAgent::new(config.agent_parameter(), || {
        adam_q_model::<Backend, Observation>(&network, learning_rate, &device)
    })?;
    if config.learning.resume {
        agent
            .resume_from(&config.learning.model_path)
            .with_context(|| format!("failed to resume from {}", config.learning.model_path.display()))?;
        log::info!("resumed from {}", config.learning.model_path.display());
    }

    let mut trainer = Trainer::new(environment, agent, config.trainer_parameter()).with_stop_signal(stop);
    let summary = trainer.run()?;
    log::info!(
        "finished after {} episodes ({} steps){}, running reward: {:.1}",
        summary.episodes,
        summary.steps,
        if summary.interrupted { " - interrupted" } else { "" },
        summary.running_reward.unwrap_or_default()
    );
    Ok(())
}
