// Cooperative main loop
//
// One `tick()` is one pass of the loop: service the hardware layer, handle at
// most one inbound command, then walk every flag in a fixed order and run the
// ones that are due. `run()` drives `tick()` from a tokio interval.

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, RuntimeConfig, FLOAT_PROBE_VALUE, LOW_BATTERY_PERIOD_MS};
use crate::dispatcher::{DispatchState, Dispatcher};
use crate::flags::{FlagId, MessageFlag};
use crate::hal::{Board, Led, SerialLink, Side};
use crate::messages::{Message, WARNING_TAG};
use crate::motor::driver::MotorDriver;
use crate::protocol::TimeAction;
use crate::scheduler::{ControlStep, Scheduler};
use crate::serial::LinkError;
use crate::time::Time;

pub struct Runtime<B: Board, L: SerialLink> {
    board: B,
    link: L,
    scheduler: Scheduler,
    dispatcher: Dispatcher,
}

impl<B: Board, L: SerialLink> Runtime<B, L> {
    /// Build the runtime. The battery filter starts from the board's first
    /// reading instead of zero.
    pub fn new(mut board: B, link: L, config: &RuntimeConfig) -> Result<Self, ConfigError> {
        let mut scheduler = Scheduler::new(config)?;
        scheduler.battery.settle_at(board.battery_sample());
        Ok(Self {
            board,
            link,
            scheduler,
            dispatcher: Dispatcher::new(),
        })
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn dispatch_state(&self) -> DispatchState {
        self.dispatcher.state()
    }

    /// One loop iteration
    pub fn tick(&mut self) -> Result<(), LinkError> {
        self.board.service();
        self.link.upkeep()?;
        self.dispatcher
            .poll(&mut self.link, &mut self.board, &mut self.scheduler);

        let now = self.board.now();

        if self.due(FlagId::Restart, now) {
            self.restart();
        }
        if self.due(FlagId::BatteryTask, now) {
            self.battery_task(now);
        }
        if self.due(FlagId::SendTime, now) {
            let tag = report_tag(&self.scheduler.flags[FlagId::SendTime], b't');
            self.link
                .send(&Message::time(tag, TimeAction::SendTime as u8, now.as_secs_f32()));
            self.scheduler.flags[FlagId::SendTime].complete(now);
        }
        if self.due(FlagId::FloatSendTimer, now) {
            self.float_probe(now);
        }
        if self.due(FlagId::LoopTimer, now) {
            self.loop_timer(now);
        }
        if self.due(FlagId::SendEncoder, now) {
            let tag = report_tag(&self.scheduler.flags[FlagId::SendEncoder], b'e');
            let (left, right) = self.board.encoder_counts();
            self.link.send(
                &Message::new("cff", tag)
                    .with_f32(left as f32)
                    .with_f32(right as f32),
            );
            self.scheduler.flags[FlagId::SendEncoder].complete(now);
        }
        if self.due(FlagId::SendBattery, now) {
            let tag = report_tag(&self.scheduler.flags[FlagId::SendBattery], b'b');
            self.link
                .send(&Message::float(tag, self.scheduler.battery.voltage()));
            self.scheduler.flags[FlagId::SendBattery].complete(now);
        }
        if self.due(FlagId::LowBattery, now) {
            let volts = self.scheduler.battery.voltage();
            warn!("Battery low: {:.2} V", volts);
            self.link.send(&Message::battery_low(volts));
            self.scheduler.flags[FlagId::LowBattery].complete(now);
        }
        if self.due(FlagId::TimedPwm, now) {
            debug!("Timed PWM expired");
            MotorDriver::new(&mut self.board).stop();
            self.scheduler.flags[FlagId::TimedPwm].deactivate();
        }
        if self.due(FlagId::SystemStatus, now) {
            self.system_status(now);
        }
        if self.due(FlagId::DistanceControl, now) {
            self.distance_control(now);
        }
        if self.due(FlagId::VelocityControl, now) {
            self.velocity_control(now);
        }
        if self.due(FlagId::MotorStop, now) {
            info!("Stop timer expired");
            self.scheduler.stop_motion(&mut self.board);
        }
        if self.due(FlagId::IrProximity, now) {
            let tag = report_tag(&self.scheduler.flags[FlagId::IrProximity], b'i');
            let left = self.board.ir_strobe(Side::Left);
            let right = self.board.ir_strobe(Side::Right);
            self.link
                .send(&Message::new("ccc", tag).with_u8(left).with_u8(right));
            self.scheduler.flags[FlagId::IrProximity].complete(now);
        }
        if self.due(FlagId::ObstacleAvoidance, now) {
            self.obstacle_avoidance(now);
        }
        Ok(())
    }

    fn due(&self, id: FlagId, now: Time) -> bool {
        self.scheduler.flags.execute(id, now)
    }

    fn restart(&mut self) {
        info!("Restarting: motors off, state reinitialized");
        self.scheduler.stop_motion(&mut self.board);
        self.scheduler.reset();
        self.dispatcher.reset();
    }

    fn battery_task(&mut self, now: Time) {
        let volts = self.scheduler.battery.sample(self.board.battery_sample());
        let low = &mut self.scheduler.flags[FlagId::LowBattery];
        if self.scheduler.battery.is_low() {
            if !low.active {
                debug!("Battery at {:.2} V, arming low-battery warning", volts);
                low.arm_periodic(LOW_BATTERY_PERIOD_MS);
            }
        } else {
            low.deactivate();
        }
        self.scheduler.flags[FlagId::BatteryTask].complete(now);
    }

    // First fire sends a float; the elapsed time is reported once the link
    // has drained it
    fn float_probe(&mut self, now: Time) {
        match self.scheduler.float_probe_start {
            None => {
                self.scheduler.float_probe_start = Some(now);
                self.link.send(&Message::float(b'f', FLOAT_PROBE_VALUE));
            }
            Some(start) if self.link.pending_output() == 0 => {
                let flag = &mut self.scheduler.flags[FlagId::FloatSendTimer];
                let tag = report_tag(flag, b't');
                flag.complete(now);
                self.scheduler.float_probe_start = None;
                self.link.send(&Message::time(
                    tag,
                    TimeAction::FloatSend as u8,
                    now.since(start).as_secs_f32(),
                ));
            }
            Some(_) => {}
        }
    }

    // First fire marks the start; the next loop reports the span
    fn loop_timer(&mut self, now: Time) {
        match self.scheduler.loop_timer_start {
            None => self.scheduler.loop_timer_start = Some(now),
            Some(start) => {
                let flag = &mut self.scheduler.flags[FlagId::LoopTimer];
                let tag = report_tag(flag, b't');
                flag.complete(now);
                self.scheduler.loop_timer_start = None;
                self.link.send(&Message::time(
                    tag,
                    TimeAction::LoopTime as u8,
                    now.since(start).as_secs_f32(),
                ));
            }
        }
    }

    fn system_status(&mut self, now: Time) {
        let tag = report_tag(&self.scheduler.flags[FlagId::SystemStatus], b'q');
        let (pwm_left, pwm_right) = self.board.motor_pwm();
        let (enc_left, enc_right) = self.board.encoder_counts();
        self.link.send(
            &Message::new("cfhhhh", tag)
                .with_f32(now.as_secs_f32())
                .with_i16(pwm_left)
                .with_i16(pwm_right)
                .with_i16(enc_left as i16)
                .with_i16(enc_right as i16),
        );
        self.scheduler.flags[FlagId::SystemStatus].complete(now);
    }

    fn distance_control(&mut self, now: Time) {
        let distances = MotorDriver::new(&mut self.board).distances();
        match self.scheduler.distance_step(now, distances) {
            ControlStep::Finished => {
                info!("Distance target reached");
                self.scheduler.finish_drive(&mut self.board);
                return;
            }
            ControlStep::Drive { left, right, travel } => {
                MotorDriver::new(&mut self.board).drive(left, right);
                if self.scheduler.diagnostics() {
                    self.link.send(
                        &Message::new("cffhh", WARNING_TAG)
                            .with_f32(travel.left)
                            .with_f32(travel.right)
                            .with_i16(left)
                            .with_i16(right),
                    );
                }
            }
            ControlStep::Waiting => {}
        }
        self.scheduler.flags[FlagId::DistanceControl].rearm(now);
    }

    fn velocity_control(&mut self, now: Time) {
        let distances = MotorDriver::new(&mut self.board).distances();
        if let ControlStep::Drive { left, right, .. } = self.scheduler.velocity_step(now, distances) {
            MotorDriver::new(&mut self.board).drive(left, right);
            if self.scheduler.diagnostics() {
                self.link.send(
                    &Message::new("chh", WARNING_TAG)
                        .with_i16(left)
                        .with_i16(right),
                );
            }
        }
        self.scheduler.flags[FlagId::VelocityControl].rearm(now);
    }

    fn obstacle_avoidance(&mut self, now: Time) {
        if let Some(decision) = self.scheduler.avoidance.tick(&mut self.board) {
            if decision.engage {
                self.scheduler.engage_velocity_control(
                    decision.velocity_left,
                    decision.velocity_right,
                    &mut self.board,
                );
                self.board.set_led(Led::Red, true);
            } else {
                self.scheduler
                    .set_velocity_targets(decision.velocity_left, decision.velocity_right);
            }
        }
        self.scheduler.flags[FlagId::ObstacleAvoidance].rearm(now);
    }

    // A dead link leaves nobody to send a stop, so halt before giving up
    fn tick_or_halt(&mut self) -> Result<(), LinkError> {
        self.tick().inspect_err(|e| {
            warn!("Link failed, stopping motors: {}", e);
            self.scheduler.stop_motion(&mut self.board);
        })
    }

    /// Tick every `loop_period` until Ctrl-C. Motors are stopped on the way out.
    pub async fn run(mut self, loop_period: Duration) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut ticker = interval(loop_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Runtime started: {}us loop, {:?} control, {} ms control period",
            loop_period.as_micros(),
            self.scheduler.strategy(),
            self.scheduler.update_period_ms()
        );

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick_or_halt()?,
                _ = &mut shutdown => {
                    info!("Shutting down");
                    self.scheduler.stop_motion(&mut self.board);
                    return Ok(());
                }
            }
        }
    }
}

// Lower-case tag for one-shot reports, upper-case for periodic ones
fn report_tag(flag: &MessageFlag, lower: u8) -> u8 {
    if flag.is_one_shot() {
        lower
    } else {
        lower.to_ascii_uppercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControlStrategy;
    use crate::motor::counts_to_distance;
    use crate::motor::kinematics::{DriveCommand, DriveMode};
    use crate::protocol::{Command, Report};
    use crate::sim::{LoopbackLink, SimBoard};

    type SimRuntime = Runtime<SimBoard, LoopbackLink>;

    fn runtime() -> SimRuntime {
        Runtime::new(SimBoard::new(), LoopbackLink::new(), &RuntimeConfig::default()).unwrap()
    }

    fn step(rt: &mut SimRuntime, ticks: usize) {
        for _ in 0..ticks {
            rt.board_mut().advance_micros(500);
            rt.tick().unwrap();
        }
    }

    fn send(rt: &mut SimRuntime, command: Command) {
        rt.link_mut().feed(&command.encode());
    }

    fn drive(mode: DriveMode, linear: f32, angular: f32, stop_after: Option<f32>) -> Command {
        Command::Drive(DriveCommand {
            mode,
            linear,
            angular,
            stop_after,
        })
    }

    fn traveled(rt: &SimRuntime) -> (f32, f32) {
        let (left, right) = rt.board().encoder_counts();
        (counts_to_distance(left), counts_to_distance(right))
    }

    #[test]
    fn test_battery_primed_from_board() {
        let rt = runtime();
        assert_eq!(rt.scheduler().battery.voltage(), 5.0);
    }

    #[test]
    fn test_send_time_one_shot() {
        let mut rt = runtime();
        rt.board_mut().set_time(Time::from_millis(1500));
        send(&mut rt, Command::Time { action: 0, period: None });
        rt.tick().unwrap();
        let sent = rt.link_mut().take_sent();
        assert_eq!(sent, vec![Message::time(b't', 0, 1.5)]);
        assert!(!rt.scheduler().flags[FlagId::SendTime].active);
    }

    #[test]
    fn test_periodic_battery_report() {
        let mut rt = runtime();
        send(
            &mut rt,
            Command::Report {
                report: Report::Battery,
                period: Some(0.1),
            },
        );
        // Every 100 ms over half a second
        step(&mut rt, 1000);
        let reports: Vec<_> = rt
            .link_mut()
            .take_sent()
            .into_iter()
            .filter(|m| m.tag() == b'B')
            .collect();
        assert_eq!(reports.len(), 5);
        assert_eq!(reports[0].format(), "cf");
    }

    #[test]
    fn test_float_round_trip() {
        let mut rt = runtime();
        send(&mut rt, Command::Time { action: 1, period: None });
        step(&mut rt, 2);
        let sent = rt.link_mut().take_sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], Message::float(b'f', FLOAT_PROBE_VALUE));
        assert_eq!(sent[1].format(), "ccf");
        assert_eq!(sent[1].tag(), b't');
        assert_eq!(sent[1].payload()[0], 1);
        assert!(!rt.scheduler().flags[FlagId::FloatSendTimer].active);
    }

    #[test]
    fn test_loop_timer_reports_one_loop() {
        let mut rt = runtime();
        send(&mut rt, Command::Time { action: 2, period: None });
        step(&mut rt, 3);
        assert_eq!(rt.link_mut().take_sent(), vec![Message::time(b't', 2, 0.0005)]);
    }

    #[test]
    fn test_encoder_and_status_reports() {
        let mut rt = runtime();
        rt.board().encoders().record(Side::Left, 120);
        rt.board().encoders().record(Side::Right, -7);
        send(&mut rt, Command::Report { report: Report::Encoders, period: None });
        step(&mut rt, 1);
        send(&mut rt, Command::Report { report: Report::SystemStatus, period: None });
        step(&mut rt, 1);

        let sent = rt.link_mut().take_sent();
        assert_eq!(
            sent[0],
            Message::new("cff", b'e').with_f32(120.0).with_f32(-7.0)
        );
        assert_eq!(sent[1].format(), "cfhhhh");
        assert_eq!(&sent[1].payload()[8..], &[120, 0, 0xF9, 0xFF]);
    }

    #[test]
    fn test_ir_report() {
        let mut rt = runtime();
        rt.board_mut().set_ir(2, 0);
        send(&mut rt, Command::Report { report: Report::Proximity, period: None });
        step(&mut rt, 1);
        assert_eq!(
            rt.link_mut().take_sent(),
            vec![Message::new("ccc", b'i').with_u8(2).with_u8(0)]
        );
    }

    #[test]
    fn test_low_battery_warning_repeats() {
        let mut board = SimBoard::new();
        board.set_battery(4.0);
        let mut rt = Runtime::new(board, LoopbackLink::new(), &RuntimeConfig::default()).unwrap();
        step(&mut rt, 2200);
        let warnings: Vec<_> = rt
            .link_mut()
            .take_sent()
            .into_iter()
            .filter(|m| m.format() == "ccccccccf")
            .collect();
        assert_eq!(warnings.len(), 1);

        // Recovered battery disarms the warning
        rt.scheduler_mut().battery.settle_at(5.0);
        rt.board_mut().set_battery(5.0);
        step(&mut rt, 2200);
        assert!(!rt.scheduler().flags[FlagId::LowBattery].active);
    }

    #[test]
    fn test_distance_drive_reaches_target() {
        let mut rt = runtime();
        send(&mut rt, drive(DriveMode::Distance, 0.1, 0.0, None));
        step(&mut rt, 4000);

        assert!(!rt.scheduler().flags[FlagId::DistanceControl].active);
        assert!(!rt.board().motor_output_enabled());
        let (left, right) = traveled(&rt);
        assert!((left - 0.1).abs() < 0.01, "left traveled {}", left);
        assert!((right - 0.1).abs() < 0.01, "right traveled {}", right);
        assert_eq!(rt.scheduler().left.target_position(), 0.0);
    }

    #[test]
    fn test_spin_right_turns_wheels_apart() {
        let mut rt = runtime();
        send(&mut rt, drive(DriveMode::Distance, 0.0, -1.0, None));
        step(&mut rt, 100);
        let (left, right) = rt.board().motor_pwm();
        assert!(left > 0 && right < 0, "pwm {:?}", (left, right));
    }

    #[test]
    fn test_velocity_drive_with_stop_timer() {
        let mut rt = runtime();
        send(&mut rt, drive(DriveMode::Velocity, 0.2, 0.0, Some(0.5)));
        step(&mut rt, 600);
        assert!(rt.board().motor_output_enabled());
        step(&mut rt, 600);

        assert!(!rt.board().motor_output_enabled());
        for id in FlagId::MOTION {
            assert!(!rt.scheduler().flags[id].active);
        }
        let (left, _) = traveled(&rt);
        assert!(left > 0.08 && left < 0.11, "left traveled {}", left);
    }

    #[test]
    fn test_reverse_velocity_drive() {
        let mut rt = runtime();
        send(&mut rt, drive(DriveMode::Velocity, -0.2, 0.0, None));
        step(&mut rt, 200);
        let (left, right) = traveled(&rt);
        assert!(left < 0.0 && right < 0.0);
    }

    #[test]
    fn test_closed_loop_drive_moves() {
        let config = RuntimeConfig {
            strategy: ControlStrategy::ClosedLoop,
            ..RuntimeConfig::default()
        };
        let mut rt = Runtime::new(SimBoard::new(), LoopbackLink::new(), &config).unwrap();
        send(&mut rt, drive(DriveMode::Velocity, 0.2, 0.0, None));
        step(&mut rt, 1000);
        let (left, right) = traveled(&rt);
        assert!(left > 0.0 && right > 0.0);
    }

    #[test]
    fn test_timed_pwm_expires() {
        let mut rt = runtime();
        send(
            &mut rt,
            Command::Pwm {
                left: 40,
                right: 40,
                duration: Some(0.2),
            },
        );
        step(&mut rt, 1);
        assert_eq!(rt.board().motor_pwm(), (40, 40));
        step(&mut rt, 500);
        assert_eq!(rt.board().motor_pwm(), (0, 0));
        assert!(!rt.board().motor_output_enabled());
        assert!(!rt.scheduler().flags[FlagId::TimedPwm].active);
    }

    #[test]
    fn test_restart_reinitializes() {
        let mut rt = runtime();
        send(&mut rt, drive(DriveMode::Velocity, 0.2, 0.0, None));
        step(&mut rt, 100);
        assert!(rt.board().motor_output_enabled());

        send(&mut rt, Command::Restart);
        step(&mut rt, 1);
        assert!(!rt.board().motor_output_enabled());
        assert_eq!(
            rt.scheduler().flags.active().collect::<Vec<_>>(),
            vec![FlagId::BatteryTask]
        );
        assert_eq!(rt.dispatch_state(), DispatchState::Idle);
    }

    #[test]
    fn test_obstacle_avoidance_turns_away_and_stops() {
        let mut rt = runtime();
        rt.board_mut().set_ir(0, 3);
        send(&mut rt, Command::ObstacleAvoidance { duration: None });
        step(&mut rt, 200);

        assert!(rt.scheduler().flags[FlagId::VelocityControl].active);
        assert!(rt.board().led(Led::Red));
        assert!(rt.board().motor_output_enabled());
        // Obstacle on the right: the right wheel is the outer one
        let scheduler = rt.scheduler();
        assert!(scheduler.right.target_velocity() > scheduler.left.target_velocity());

        send(&mut rt, Command::Stop);
        step(&mut rt, 1);
        assert!(!rt.board().led(Led::Red));
        assert!(!rt.scheduler().flags[FlagId::ObstacleAvoidance].active);
        assert_eq!(rt.board().motor_pwm(), (0, 0));
    }

    #[test]
    fn test_diagnostic_frames() {
        let config = RuntimeConfig {
            diagnostics: true,
            ..RuntimeConfig::default()
        };
        let mut rt = Runtime::new(SimBoard::new(), LoopbackLink::new(), &config).unwrap();
        send(&mut rt, drive(DriveMode::Velocity, 0.2, 0.0, None));
        rt.tick().unwrap();
        assert_eq!(rt.link_mut().take_sent(), vec![Message::text(b'v', "Go Str")]);
        step(&mut rt, 100);
        let sent = rt.link_mut().take_sent();
        assert!(!sent.is_empty());
        assert!(sent.iter().all(|m| m.tag() == WARNING_TAG && m.format() == "chh"));
    }

    struct BrokenLink;

    impl SerialLink for BrokenLink {
        fn upkeep(&mut self) -> Result<(), LinkError> {
            Err(LinkError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "port gone",
            )))
        }

        fn available(&self) -> usize {
            0
        }

        fn peek(&self) -> Option<u8> {
            None
        }

        fn consume(&mut self) -> Option<u8> {
            None
        }

        fn flush_input(&mut self) {}

        fn send(&mut self, _message: &Message) {}
    }

    #[test]
    fn test_link_failure_stops_motors() {
        let mut rt = Runtime::new(SimBoard::new(), BrokenLink, &RuntimeConfig::default()).unwrap();
        rt.scheduler_mut().flags[FlagId::VelocityControl].arm_periodic(10.0);
        MotorDriver::new(rt.board_mut()).drive(60, -60);

        assert!(matches!(rt.tick_or_halt(), Err(LinkError::Io(_))));
        assert!(!rt.board().motor_output_enabled());
        assert_eq!(rt.board().motor_pwm(), (0, 0));
        assert!(!rt.scheduler().flags[FlagId::VelocityControl].active);
    }

    #[tokio::test]
    async fn test_run_returns_link_error() {
        let rt = Runtime::new(SimBoard::new(), BrokenLink, &RuntimeConfig::default()).unwrap();
        let result = rt.run(Duration::from_millis(1)).await;
        assert!(result.is_err());
    }
}
