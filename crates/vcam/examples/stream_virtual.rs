use std::time::Duration;

use tracing_subscriber::EnvFilter;
use vcam::prelude::*;

fn main() -> Result<(), DeviceError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vcam=debug")),
        )
        .init();

    let cam = VirtualCamera::open(DeviceConfig::new().card("virtual-rgb565").fps(60));
    let caps = cam.query_capabilities();
    println!(
        "{} ({}) on {} caps={:?}",
        caps.card, caps.driver, caps.bus_info, caps.device_caps
    );

    let mut index = 0;
    while let Ok(desc) = cam.enum_formats(index) {
        println!("format #{index}: {} [{}]", desc.code, desc.name);
        index += 1;
    }

    let fmt = cam.set_format(&FormatRequest::new(FourCc::RGB565, 320, 180))?;
    println!(
        "negotiated {}x{} {} stride={} size={}",
        fmt.width(),
        fmt.height(),
        fmt.code(),
        fmt.bytes_per_line(),
        fmt.size_image()
    );

    let count = cam.request_buffers(4)?;
    for i in 0..count {
        cam.queue_buffer(i)?;
    }
    cam.stream_on()?;

    let mut frames = 0;
    while frames < 12 {
        match cam.dequeue_timeout(Duration::from_millis(500)) {
            RecvOutcome::Data(info) => {
                frames += 1;
                let first = cam.read_buffer(info.index, |d| d.first().copied().unwrap_or_default())?;
                println!(
                    "#{frames:02} buf={} seq={} ts={} bytes={} first_byte={first}",
                    info.index, info.sequence, info.timestamp, info.bytes_used
                );
                cam.queue_buffer(info.index)?;
            }
            RecvOutcome::Empty => continue,
            RecvOutcome::Closed => break,
        }
    }

    let drained = cam.stream_off();
    let stats = cam.stats();
    let metrics = cam.metrics();
    println!(
        "completed={} aborted={drained} empty_ticks={} delivered={} interval_ms={:.2?} fps={:.1?}",
        stats.completed,
        stats.empty_ticks,
        metrics.delivered,
        metrics.avg_interval_millis,
        metrics.fps
    );
    cam.close();
    Ok(())
}
