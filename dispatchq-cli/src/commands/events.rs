//! Event tailing
//!
//! Prints the lifecycle events of a queue, named the way a dispatcher
//! re-emits them.

use color_eyre::Result;
use dispatchq::dispatch::events::{event_name, event_payload};
use dispatchq::queue::QueueBackend;

/// Print events of `queue` until interrupted or `count` events were seen
pub async fn tail(backend: &dyn QueueBackend, queue: &str, count: Option<usize>) -> Result<()> {
    let mut subscription = backend.subscribe(queue).await?;
    println!("Listening to events of queue '{}' (Ctrl-C to stop)", queue);

    let mut seen = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = subscription.recv() => {
                let Some(event) = event else { break };

                let job_name = match event.job_id() {
                    Some(id) => backend.get_job(queue, id).await?.map(|job| job.name),
                    None => None,
                };
                let name = event_name(job_name.as_deref(), &event);
                let payload = event_payload(&event)
                    .map(|p| p.to_string())
                    .unwrap_or_default();
                println!(
                    "{} {}.{} {}",
                    chrono::Local::now().format("%H:%M:%S%.3f"),
                    queue,
                    name,
                    payload
                );

                seen += 1;
                if count.is_some_and(|count| seen >= count) {
                    break;
                }
            }
        }
    }

    subscription.close();
    Ok(())
}
