use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use devlink_core::config::{ChannelConfig, TimerConfig};
use devlink_devices::protocols::MemoryTransport;
use devlink_devices::{ChannelExt, InMemoryRegistry, IoRequest, Payload, PushDispatcher, SequentialChannel};

use devlink_engine::{
    AsyncOperation, Attribute, AttributeSet, AttributeType, DeviceBinding, Error, FnExecutor, JsonMessageHandler,
    OneoffOperation, OperationScheduler, OperationSpec, Parameters, Record, RecordPipeline, Script,
    SimulatedPeriodicOperation, StaticFieldsModifier, TaskHandler, TimerService, Value,
};

/// Prints whatever the scheduler delivers
struct PrintHandler(&'static str);

impl TaskHandler for PrintHandler {
    fn on_record(&self, record: Record) {
        println!("[{}] {:?}", self.0, record);
    }

    fn on_error(&self, error: Error, fatal: bool) {
        println!("[{}] error (fatal: {}): {}", self.0, fatal, error);
    }

    fn on_complete(&self) {
        println!("[{}] complete", self.0);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();
    devlink_engine::init()?;

    let temperature = Attribute::new("temperature", AttributeType::Float);
    let humidity = Attribute::new("humidity", AttributeType::Float);
    let alarm = Attribute::new("alarm", AttributeType::String);
    let site = Attribute::new("site", AttributeType::String);

    // A simulated sensor answering "READ <name>" requests
    let transport = MemoryTransport::new(|request| {
        let reading = match request.id().as_str() {
            "READ temperature" => "21.5",
            "READ humidity" => "48.0",
            _ => "0",
        };
        Ok(Some(Payload::from_string(reading)))
    })
    .with_latency(Duration::from_millis(5))
    .shared();

    let channel = Arc::new(SequentialChannel::start("sensor-bus", transport.clone(), &ChannelConfig::default())?);
    let dispatcher = PushDispatcher::install(channel.as_ref())?;

    // Scripts become channel requests; the answer is a single float
    let executor = {
        let channel = channel.clone();
        let temperature = temperature.clone();
        let humidity = humidity.clone();
        FnExecutor::new(move |script: Script, _parameters: Parameters| {
            let channel = channel.clone();
            let attribute = if script.source().ends_with("humidity") {
                humidity.clone()
            } else {
                temperature.clone()
            };
            async move {
                let payload = channel.request(IoRequest::new(script.source()))?.await?;
                let reading = payload
                    .as_ref()
                    .and_then(|p| p.as_str().ok())
                    .and_then(|s| s.parse::<f64>().ok())
                    .ok_or_else(|| Error::script(format!("{} returned no reading", script.id())))?;
                Ok::<_, Error>(vec![Record::builder().set(attribute, reading).build()])
            }
            .boxed()
        })
        .shared()
    };

    let read_temperature = OneoffOperation::new(
        OperationSpec::new("temperature", AttributeSet::from([temperature.clone()])),
        Script::new("read-temperature", "READ temperature"),
        executor.clone(),
    )?;

    let timers = TimerService::new(&TimerConfig::default())?;
    let sample_humidity = SimulatedPeriodicOperation::new(
        OperationSpec::new("humidity", AttributeSet::from([humidity.clone()])),
        Script::new("read-humidity", "READ humidity"),
        executor.clone(),
        timers.clone(),
    );

    let alarms = AsyncOperation::new(
        OperationSpec::new("alarms", AttributeSet::from([alarm.clone()])),
        Script::new("subscribe", "SUBSCRIBE alarms"),
        FnExecutor::new(|_, _| async { Ok(Vec::new()) }.boxed()).shared(),
        Arc::new(JsonMessageHandler::new("alarm", [alarm.clone()])),
    )?;
    dispatcher.subscribe(alarms.clone());

    let scheduler = Arc::new(
        OperationScheduler::builder()
            .get(read_temperature)
            .periodic(sample_humidity)
            .async_op(alarms)
            .build(),
    );

    let registry = InMemoryRegistry::new();
    println!("Published {} capabilities", scheduler.publish(&registry)?);

    scheduler.schedule_get(
        &AttributeSet::from([temperature]),
        Parameters::new(),
        Arc::new(PrintHandler("get")),
        RecordPipeline::builder(),
    )?;

    let tagged = RecordPipeline::builder().add(StaticFieldsModifier::new([(site, Value::from("greenhouse"))]));
    let sampling = scheduler.schedule_periodic(
        &AttributeSet::from([humidity]),
        200,
        Parameters::new(),
        Arc::new(PrintHandler("periodic")),
        tagged,
    )?;

    scheduler.schedule_async(
        &AttributeSet::from([alarm]),
        Parameters::new(),
        Arc::new(PrintHandler("async")),
        RecordPipeline::builder(),
    )?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    transport.push(Payload::from_string(r#"{"type":"alarm","alarm":"door open"}"#));

    tokio::time::sleep(Duration::from_millis(700)).await;
    sampling.stop();

    let device = DeviceBinding::new("greenhouse-sensor", scheduler).with_channel(channel);
    device.shutdown().await;
    println!("Device shut down");

    Ok(())
}
