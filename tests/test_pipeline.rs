use parking_lot::Mutex;
use partitioned_pipeline::{
    CancelToken, PartitionedChannel, Pipeline, PipelineError, Source, Stage,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(5);

/// The reference topology: ints -> scale by 0.97 -> wrap in dashes -> collect
fn three_stage_pipeline(
    cancel: CancelToken,
    collected: Arc<Mutex<Vec<String>>>,
    items: impl Iterator<Item = i64> + Send + 'static,
) -> Pipeline {
    let ints = PartitionedChannel::new(4, 10).unwrap();
    let scaled = PartitionedChannel::new(4, 10).unwrap();
    let wrapped = PartitionedChannel::new(4, 10).unwrap();

    let source = Source::new("ints", ints.clone(), cancel.clone()).with_retry_timeout(POLL);
    let scale = Stage::new(
        "scale",
        ints,
        scaled.clone(),
        |n: i64| Ok(n as f64 * 0.97),
        cancel.clone(),
    )
    .with_poll_timeout(POLL);
    let wrap = Stage::new(
        "wrap",
        scaled,
        wrapped.clone(),
        |v: f64| Ok(format!("--{}--", v)),
        cancel.clone(),
    )
    .with_poll_timeout(POLL);
    let collect = Stage::sink(
        "collect",
        wrapped,
        move |s: String| {
            collected.lock().push(s);
            Ok(())
        },
        cancel.clone(),
    )
    .with_poll_timeout(POLL);

    Pipeline::new(cancel)
        .worker("source", move || source.run(items))
        .worker("scale", move || scale.run())
        .worker("wrap", move || wrap.run())
        .worker("collect", move || collect.run())
}

#[test]
fn test_every_item_arrives_exactly_once() {
    let cancel = CancelToken::new();
    let collected = Arc::new(Mutex::new(Vec::new()));

    let outcome = three_stage_pipeline(cancel, Arc::clone(&collected), 0..40)
        .execute()
        .expect("Execute failed");

    assert!(outcome.is_completed());
    let got = collected.lock();
    assert_eq!(got.len(), 40);
    for n in 0..40 {
        let expected = format!("--{}--", n as f64 * 0.97);
        assert!(got.contains(&expected), "missing {expected}");
    }
}

#[test]
fn test_cancellation_reports_canceled_outcome() {
    let cancel = CancelToken::new();
    let collected = Arc::new(Mutex::new(Vec::new()));

    // The work sequence itself trips the token after five items have
    // been handed to the source
    let trigger = cancel.clone();
    let items = (0i64..40).map(move |n| {
        if n == 5 {
            trigger.cancel();
        }
        n
    });

    let outcome = three_stage_pipeline(cancel, Arc::clone(&collected), items)
        .execute()
        .expect("Execute failed");

    assert!(outcome.is_canceled());
    assert!(collected.lock().len() <= 5);
}

#[test]
fn test_canceled_pipeline_returns_promptly() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let collected = Arc::new(Mutex::new(Vec::new()));

    let started = Instant::now();
    let outcome = three_stage_pipeline(cancel, collected, 0..1_000_000)
        .execute()
        .expect("Execute failed");

    assert!(outcome.is_canceled());
    // Every wait is bounded by the poll timeout, so exit is fast even
    // with a huge undelivered sequence
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_transform_failure_fails_the_pipeline() {
    let cancel = CancelToken::new();
    let ints = PartitionedChannel::new(4, 10).unwrap();
    let scaled: PartitionedChannel<f64> = PartitionedChannel::new(4, 10).unwrap();

    let source = Source::new("ints", ints.clone(), cancel.clone()).with_retry_timeout(POLL);
    let scale = Stage::new(
        "scale",
        ints,
        scaled.clone(),
        |n: i64| {
            if n == 13 {
                Err(PipelineError::Transform("unlucky input".into()))
            } else {
                Ok(n as f64 * 0.97)
            }
        },
        cancel.clone(),
    )
    .with_poll_timeout(POLL);
    let drain = Stage::sink("drain", scaled, |_: f64| Ok(()), cancel.clone()).with_poll_timeout(POLL);

    let outcome = Pipeline::new(cancel)
        .worker("source", move || source.run(0..40))
        .worker("scale", move || scale.run())
        .worker("drain", move || drain.run())
        .execute()
        .expect("Execute failed");

    let errors = outcome.errors();
    assert!(!errors.is_empty());
    assert!(errors
        .iter()
        .any(|e| matches!(e, PipelineError::StageFailed { stage, .. } if stage == "scale")));
}

#[test]
fn test_panicking_transform_does_not_hang_the_pipeline() {
    let cancel = CancelToken::new();
    let ints = PartitionedChannel::new(4, 10).unwrap();
    let scaled: PartitionedChannel<f64> = PartitionedChannel::new(4, 10).unwrap();

    let source = Source::new("ints", ints.clone(), cancel.clone()).with_retry_timeout(POLL);
    let scale = Stage::new(
        "scale",
        ints,
        scaled.clone(),
        |n: i64| {
            if n == 7 {
                panic!("poisoned item");
            }
            Ok(n as f64 * 0.97)
        },
        cancel.clone(),
    )
    .with_poll_timeout(POLL);
    let drain = Stage::sink("drain", scaled, |_: f64| Ok(()), cancel.clone()).with_poll_timeout(POLL);

    // Must return rather than block: the dead stage still closes its
    // downstream channel and cancels the source's retry loop
    let outcome = Pipeline::new(cancel)
        .worker("source", move || source.run(0..100))
        .worker("scale", move || scale.run())
        .worker("drain", move || drain.run())
        .execute()
        .expect("Execute failed");

    assert!(outcome
        .errors()
        .iter()
        .any(|e| matches!(e, PipelineError::WorkerPanic(name) if name == "scale")));
}

#[test]
fn test_completion_propagates_through_every_channel() {
    let cancel = CancelToken::new();
    let ints = PartitionedChannel::new(4, 10).unwrap();
    let doubled = PartitionedChannel::new(4, 10).unwrap();

    let source = Source::new("ints", ints.clone(), cancel.clone()).with_retry_timeout(POLL);
    let double = Stage::new(
        "double",
        ints.clone(),
        doubled.clone(),
        |n: i64| Ok(n * 2),
        cancel.clone(),
    )
    .with_poll_timeout(POLL);
    let drain = Stage::sink("drain", doubled.clone(), |_: i64| Ok(()), cancel.clone())
        .with_poll_timeout(POLL);

    let outcome = Pipeline::new(cancel)
        .worker("source", move || source.run(0..25))
        .worker("double", move || double.run())
        .worker("drain", move || drain.run())
        .execute()
        .expect("Execute failed");

    assert!(outcome.is_completed());
    assert!(ints.is_fully_complete());
    assert!(doubled.is_fully_complete());
}

#[test]
fn test_backpressure_engages_with_slow_sink() {
    let cancel = CancelToken::new();
    let ints = PartitionedChannel::new(2, 2).unwrap();
    let forwarded = PartitionedChannel::new(2, 2).unwrap();

    let source = Source::new("ints", ints.clone(), cancel.clone()).with_retry_timeout(POLL);
    let forward = Stage::new(
        "forward",
        ints,
        forwarded.clone(),
        |n: i64| Ok(n),
        cancel.clone(),
    )
    .with_poll_timeout(POLL);
    let metrics = forward.metrics();
    let slow = Stage::sink(
        "slow",
        forwarded,
        |_: i64| {
            std::thread::sleep(Duration::from_millis(2));
            Ok(())
        },
        cancel.clone(),
    )
    .with_poll_timeout(POLL);

    let outcome = Pipeline::new(cancel)
        .worker("source", move || source.run(0..100))
        .worker("forward", move || forward.run())
        .worker("slow", move || slow.run())
        .execute()
        .expect("Execute failed");

    assert!(outcome.is_completed());
    assert_eq!(metrics.total_processed(), 100);
    // Tiny buffers and a slow consumer must have forced publish retries
    assert!(metrics.total_publish_retries() > 0);
}

#[test]
fn test_concurrent_consumers_see_each_item_once() {
    let channel = PartitionedChannel::new(4, 256).unwrap();
    for i in 0..1000 {
        loop {
            if let partitioned_pipeline::AddOutcome::Accepted(_) =
                channel.try_add_any(i, POLL).unwrap()
            {
                break;
            }
        }
    }
    channel.complete_adding();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let consumer = channel.clone();
        handles.push(std::thread::spawn(move || {
            let mut taken = Vec::new();
            while let Some((item, _)) = consumer.try_take_any(POLL) {
                taken.push(item);
            }
            taken
        }));
    }

    let mut all: Vec<i32> = handles
        .into_iter()
        .flat_map(|h| h.join().expect("Consumer panicked"))
        .collect();
    all.sort_unstable();
    assert_eq!(all, (0..1000).collect::<Vec<_>>());
    assert!(channel.is_fully_complete());
}
