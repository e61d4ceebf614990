//! Multi-node simulation of the coordination kernel over the in-memory
//! transport: elections, causal delivery, a graceful handover and a crash.

use std::time::Duration;
use tokio::sync::mpsc;
use vmesh_core::{NodeId, OrderedEvent};
use vmesh_kernel::{memory_network, Kernel, KernelConfig, MemoryTransport};

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    rt.block_on(async_main());
}

fn sim_config() -> KernelConfig {
    KernelConfig::builder()
        .heartbeat_interval(Duration::from_millis(100))
        .heartbeat_timeout(Duration::from_millis(300))
        .election_timeout(Duration::from_millis(250))
        .join_timeout(Duration::from_millis(500))
        .group_repeat_delay(Duration::from_millis(20))
        .retry_delay(Duration::from_millis(150))
        .build()
}

async fn async_main() {
    println!("=== voltmesh cluster simulation ===\n");

    let ids = [NodeId(1), NodeId(2), NodeId(3), NodeId(4)];
    let mesh = memory_network(&ids);
    for transport in &mesh {
        transport.set_loss_rate(0.05);
    }

    let mut kernels: Vec<Kernel<MemoryTransport>> = Vec::new();
    let mut queues: Vec<mpsc::Receiver<OrderedEvent>> = Vec::new();
    for (id, transport) in ids.into_iter().zip(mesh) {
        let (kernel, deliveries) = Kernel::start(id, transport, sim_config());
        kernels.push(kernel);
        queues.push(deliveries);
    }

    // Watch each node's delivery queue from the side.
    for (id, mut queue) in ids.into_iter().zip(queues) {
        tokio::spawn(async move {
            while let Some(event) = queue.recv().await {
                println!(
                    "  [{}] delivered {:?} from {} (clock {})",
                    id, event.kind, event.origin, event.clock
                );
            }
        });
    }

    println!("-> all four nodes joining");
    for kernel in &kernels {
        if let Err(err) = kernel.join().await {
            eprintln!("join failed on {}: {err}", kernel.node());
        }
    }
    tokio::time::sleep(Duration::from_secs(2)).await;
    report_coordinators(&kernels);

    println!("\n-> node-1 broadcasts three ledger events");
    for seq in 1..=3u64 {
        if let Err(err) = kernels[0]
            .publish(serde_json::json!({"op": "credit", "seq": seq, "amount": 10 * seq}))
            .await
        {
            eprintln!("publish failed: {err}");
        }
    }
    tokio::time::sleep(Duration::from_millis(800)).await;

    println!("\n-> node-2 runs an acked trade handshake with node-3");
    match kernels[1]
        .request(NodeId(3), serde_json::json!({"op": "trade_request", "amount": 25}))
        .await
    {
        Ok(id) => println!("  handshake request {id} acknowledged"),
        Err(err) => eprintln!("  handshake failed: {err}"),
    }
    tokio::time::sleep(Duration::from_millis(500)).await;

    println!("\n-> the coordinator leaves gracefully");
    if let Err(err) = kernels[3].leave().await {
        eprintln!("leave failed: {err}");
    }
    tokio::time::sleep(Duration::from_secs(2)).await;
    report_coordinators(&kernels[..3]);

    println!("\n-> the new coordinator crashes silently");
    kernels[2].halt();
    tokio::time::sleep(Duration::from_secs(3)).await;
    report_coordinators(&kernels[..2]);

    println!("\n-> shutting down the survivors");
    for kernel in &kernels[..2] {
        let _ = kernel.leave().await;
    }
    println!("\nsimulation complete");
}

fn report_coordinators(kernels: &[Kernel<MemoryTransport>]) {
    for kernel in kernels {
        match kernel.coordinator() {
            Some(id) => println!("  {} sees coordinator {}", kernel.node(), id),
            None => println!("  {} sees no coordinator", kernel.node()),
        }
    }
}
