//! [`Bridge`] – spawns and joins the bridge tasks.
//!
//! | task | count | stops when |
//! |---|---|---|
//! | feed listener | 1 | shutdown, or the signal feed closes |
//! | pipeline worker | `settings.workers` | the queue is closed and drained |
//! | reconciler | 1 | shutdown |
//! | command dispatcher | 1 | shutdown, or the subscription closes |

use std::sync::Arc;

use busbridge_types::BridgeError;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::context::BridgeContext;
use crate::dispatcher::CommandDispatcher;
use crate::pipeline::{ExtractionPipeline, SharedQueue, run_listener, run_worker};

/// A running bridge.
pub struct Bridge {
    ctx: Arc<BridgeContext>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Bridge {
    /// Subscribe to the command topic and spawn every task.
    ///
    /// # Errors
    ///
    /// Returns the broker's error when the command subscription is refused;
    /// nothing has been spawned in that case.
    pub async fn start(ctx: Arc<BridgeContext>) -> Result<Self, BridgeError> {
        let settings = &ctx.settings;
        let commands = ctx.broker.subscribe(&settings.command_topic).await?;
        let feed = ctx.bus.signals();
        let (queue_tx, queue_rx) = mpsc::channel(settings.queue_capacity.max(1));
        let queue: SharedQueue = Arc::new(Mutex::new(queue_rx));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let mut tasks = Vec::new();
        tasks.push((
            "listener".to_string(),
            tokio::spawn(run_listener(feed, queue_tx, shutdown_rx.clone())),
        ));

        let pipeline = ExtractionPipeline::new(Arc::clone(&ctx));
        let workers = settings.workers.max(1);
        for id in 0..workers {
            tasks.push((
                format!("worker-{id}"),
                tokio::spawn(run_worker(id, pipeline.clone(), Arc::clone(&queue))),
            ));
        }

        tasks.push((
            "reconciler".to_string(),
            tokio::spawn(ctx.reconciler().run(shutdown_rx.clone())),
        ));

        let dispatcher = CommandDispatcher::new(Arc::clone(&ctx.bus), ctx.discovery());
        tasks.push((
            "dispatcher".to_string(),
            tokio::spawn(dispatcher.run(commands, shutdown_rx)),
        ));

        info!(
            workers,
            queue_capacity = settings.queue_capacity,
            command_topic = %settings.command_topic,
            "bridge started"
        );
        Ok(Self {
            ctx,
            shutdown,
            tasks,
        })
    }

    pub fn context(&self) -> &Arc<BridgeContext> {
        &self.ctx
    }

    /// Signal shutdown and wait for every task to finish.
    pub async fn shutdown(self) {
        info!("bridge shutting down");
        // Every task may already have exited; there is nobody to notify then.
        let _ = self.shutdown.send(true);
        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                error!(task = %name, error = %e, "bridge task ended abnormally");
            }
        }
        info!("bridge stopped");
    }
}
