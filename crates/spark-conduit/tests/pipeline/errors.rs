use spark_conduit::{ConduitConfig, CoreError, PipelineConfig, codes};

use super::support::{Behavior, Fixture, Probe, entries, log};

fn five_handlers(fixture: &Fixture, failing: Behavior) -> super::support::Log {
    let trace = log();
    for (index, name) in ["h1", "h2", "h3", "h4", "h5"].into_iter().enumerate() {
        let behavior = if index == 2 { failing } else { Behavior::Forward };
        fixture
            .pipeline
            .add_last(name, Probe::with(name, &trace, behavior))
            .expect("add probe");
    }
    trace
}

#[test]
fn error_in_the_middle_is_seen_only_downstream() {
    let fixture = Fixture::new();
    let trace = five_handlers(&fixture, Behavior::Fail);

    fixture.pipeline.fire_read(1u32);
    fixture.drive();

    assert_eq!(
        entries(&trace),
        vec![
            "h1:read(1)",
            "h2:read(1)",
            "h3:read(1)",
            "h4:error(test.boom)",
            "h5:error(test.boom)",
        ]
    );
    assert_eq!(fixture.logger.warning_codes(), vec![Some("test.boom")]);
}

#[test]
fn panicking_handler_becomes_an_exception_event() {
    let fixture = Fixture::new();
    let trace = five_handlers(&fixture, Behavior::Panic);

    fixture.pipeline.fire_read(2u32);
    fixture.drive();

    let recorded = entries(&trace);
    assert_eq!(
        &recorded[3..],
        [
            format!("h4:error({})", codes::PIPELINE_HANDLER_PANICKED),
            format!("h5:error({})", codes::PIPELINE_HANDLER_PANICKED),
        ]
    );
    assert_eq!(
        fixture.logger.warning_codes(),
        vec![Some(codes::PIPELINE_HANDLER_PANICKED)]
    );
}

#[test]
fn handled_exception_does_not_reach_the_tail() {
    let fixture = Fixture::new();
    let trace = log();
    fixture
        .pipeline
        .add_last("guard", Probe::with("guard", &trace, Behavior::Swallow))
        .expect("add guard");
    fixture
        .pipeline
        .add_last("after", Probe::forward("after", &trace))
        .expect("add after");

    fixture
        .pipeline
        .fire_error(CoreError::new("test.injected", "injected"));
    fixture.drive();

    assert_eq!(entries(&trace), vec!["guard:error(test.injected)"]);
    assert!(fixture.logger.warnings.lock().is_empty());
}

#[test]
fn unhandled_exception_can_close_the_connection() {
    let fixture = Fixture::with_config(ConduitConfig {
        pipeline: PipelineConfig {
            close_on_unhandled_exception: true,
        },
        ..ConduitConfig::default()
    });

    fixture
        .pipeline
        .fire_error(CoreError::new("test.injected", "injected"));
    fixture.drive();

    assert_eq!(fixture.logger.warning_codes(), vec![Some("test.injected")]);
    assert_eq!(fixture.transport_ops(), vec!["close"]);
}

#[test]
fn unhandled_exception_keeps_the_connection_by_default() {
    let fixture = Fixture::new();
    fixture
        .pipeline
        .fire_error(CoreError::new("test.injected", "injected"));
    fixture.drive();
    assert!(fixture.transport_ops().is_empty());
}
