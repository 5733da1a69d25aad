use crate::synth_math::{PAN_CENTER, retrigger_rate};

/// Parameter number selected by RPN 0/0 (pitch-bend range).
const PITCH_BEND_RANGE_PARAMETER: i32 = 16384;
const RPN_OFFSET: i32 = 16384;

/// Per-channel controller state.
#[derive(Debug, Clone)]
pub struct Channel {
    initial_program: u32,
    program: u32,
    bank: u32,

    modulation: i32,
    portamento_time: i32,
    volume: i32,
    pan: i32,
    expression: i32,
    pitch_bend: i32,

    parameter_number: i32,
    pitch_bend_range: i32,

    sample_loop: i32,
    retrigger_control: i32,
    retrigger_rate: i32,

    hold: bool,
    legato: bool,
    retrigger: bool,
}

impl Default for Channel {
    fn default() -> Self {
        let mut channel = Self {
            initial_program: 0,
            program: 0,
            bank: 0,
            modulation: 0,
            portamento_time: 0,
            volume: 0,
            pan: 0,
            expression: 0,
            pitch_bend: 0,
            parameter_number: 0,
            pitch_bend_range: 0,
            sample_loop: 0,
            retrigger_control: 0,
            retrigger_rate: 0,
            hold: false,
            legato: false,
            retrigger: false,
        };
        channel.reset_all_controllers();
        channel
    }
}

macro_rules! set_coarse_fine {
    ($field:ident, $coarse:ident, $fine:ident) => {
        pub(crate) fn $coarse(&mut self, value: u8) {
            let value = (value & 0x7F) as i32;
            self.$field = (self.$field & !0x3F80) | (value << 7);
        }

        pub(crate) fn $fine(&mut self, value: u8) {
            let value = (value & 0x7F) as i32;
            self.$field = (self.$field & !0x7F) | value;
        }
    };
}

impl Channel {
    pub(crate) fn reset_all_controllers(&mut self) {
        self.volume = 12800;
        self.pan = PAN_CENTER;
        self.expression = 16383;
        self.pitch_bend = 8192;
        self.modulation = 0;
        self.portamento_time = 8192;
        self.parameter_number = 32767;
        self.pitch_bend_range = 256;
        self.sample_loop = 0;
        self.retrigger_control = 8192;
        self.retrigger_rate = retrigger_rate(self.retrigger_control);
        self.hold = false;
        self.legato = false;
        self.retrigger = false;
    }

    /// Restores the program the channel was configured with.
    pub(crate) fn restore_program(&mut self) {
        self.program = self.initial_program;
        self.bank = self.initial_program & !0x7F;
    }

    pub(crate) fn set_initial_program(&mut self, program: u32) {
        self.initial_program = program;
        self.bank = program & !0x7F;
    }

    /// Stores the program; returns `true` when it changed.
    pub(crate) fn set_program(&mut self, program: u32) -> bool {
        let changed = self.program != program;
        self.program = program;
        changed
    }

    pub(crate) fn set_bank_coarse(&mut self, value: u8) {
        self.bank = (u32::from(value & 0x7F) << 14) | (self.bank & !0x1F_C000);
    }

    pub(crate) fn set_bank_fine(&mut self, value: u8) {
        self.bank = (u32::from(value & 0x7F) << 7) | (self.bank & !0x3F80);
    }

    set_coarse_fine!(modulation, set_modulation_coarse, set_modulation_fine);
    set_coarse_fine!(portamento_time, set_portamento_time_coarse, set_portamento_time_fine);
    set_coarse_fine!(volume, set_volume_coarse, set_volume_fine);
    set_coarse_fine!(pan, set_pan_coarse, set_pan_fine);
    set_coarse_fine!(expression, set_expression_coarse, set_expression_fine);
    set_coarse_fine!(sample_loop, set_sample_loop_coarse, set_sample_loop_fine);
    set_coarse_fine!(pitch_bend_range, set_pbr_coarse, set_pbr_fine);
    set_coarse_fine!(retrigger_control, set_retrigger_control_coarse, set_retrigger_control_fine);

    pub(crate) fn set_retrigger_rate_coarse(&mut self, value: u8) {
        self.set_retrigger_control_coarse(value);
        self.retrigger_rate = retrigger_rate(self.retrigger_control);
    }

    pub(crate) fn set_retrigger_rate_fine(&mut self, value: u8) {
        self.set_retrigger_control_fine(value);
        self.retrigger_rate = retrigger_rate(self.retrigger_control);
    }

    pub(crate) fn set_nrpn_coarse(&mut self, value: u8) {
        self.parameter_number = (i32::from(value & 0x7F) << 7) | (self.parameter_number & 0x7F);
    }

    pub(crate) fn set_nrpn_fine(&mut self, value: u8) {
        self.parameter_number = (self.parameter_number & 0x3F80) | i32::from(value & 0x7F);
    }

    pub(crate) fn set_rpn_coarse(&mut self, value: u8) {
        self.parameter_number =
            ((i32::from(value & 0x7F) << 7) | (self.parameter_number & 0x7F)) + RPN_OFFSET;
    }

    pub(crate) fn set_rpn_fine(&mut self, value: u8) {
        self.parameter_number =
            ((self.parameter_number & 0x3F80) | i32::from(value & 0x7F)) + RPN_OFFSET;
    }

    pub(crate) fn data_entry_coarse(&mut self, value: u8) {
        if self.parameter_number == PITCH_BEND_RANGE_PARAMETER {
            self.set_pbr_coarse(value);
        }
    }

    pub(crate) fn data_entry_fine(&mut self, value: u8) {
        if self.parameter_number == PITCH_BEND_RANGE_PARAMETER {
            self.set_pbr_fine(value);
        }
    }

    pub(crate) fn set_pitch_bend(&mut self, value: u16) {
        self.pitch_bend = i32::from(value & 0x3FFF);
    }

    pub(crate) fn set_hold(&mut self, on: bool) {
        self.hold = on;
    }

    /// Returns the previous state.
    pub(crate) fn set_legato(&mut self, on: bool) -> bool {
        std::mem::replace(&mut self.legato, on)
    }

    /// Returns the previous state.
    pub(crate) fn set_retrigger(&mut self, on: bool) -> bool {
        std::mem::replace(&mut self.retrigger, on)
    }

    pub fn program(&self) -> u32 {
        self.program
    }

    pub fn bank(&self) -> u32 {
        self.bank
    }

    pub fn modulation(&self) -> i32 {
        self.modulation
    }

    pub fn portamento_time(&self) -> i32 {
        self.portamento_time
    }

    pub fn volume(&self) -> i32 {
        self.volume
    }

    pub fn pan(&self) -> i32 {
        self.pan
    }

    pub fn expression(&self) -> i32 {
        self.expression
    }

    pub fn pitch_bend(&self) -> i32 {
        self.pitch_bend
    }

    /// Bend range in 1/128 semitones at full deflection.
    pub fn pitch_bend_range(&self) -> i32 {
        self.pitch_bend_range
    }

    pub fn sample_loop(&self) -> i32 {
        self.sample_loop
    }

    pub fn retrigger_rate(&self) -> i32 {
        self.retrigger_rate
    }

    pub fn hold(&self) -> bool {
        self.hold
    }

    pub fn legato(&self) -> bool {
        self.legato
    }

    pub fn retrigger(&self) -> bool {
        self.retrigger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coarse_and_fine_combine_into_14_bits() {
        let mut channel = Channel::default();
        channel.set_volume_coarse(100);
        channel.set_volume_fine(5);
        assert_eq!(channel.volume(), (100 << 7) | 5);
        channel.set_volume_coarse(1);
        assert_eq!(channel.volume(), (1 << 7) | 5);
    }

    #[test]
    fn bank_select_accumulates_above_the_program() {
        let mut channel = Channel::default();
        channel.set_bank_coarse(1);
        channel.set_bank_fine(2);
        assert_eq!(channel.bank(), (1 << 14) | (2 << 7));
        channel.set_bank_coarse(0);
        assert_eq!(channel.bank(), 2 << 7);
    }

    #[test]
    fn rpn_zero_sets_bend_range() {
        let mut channel = Channel::default();
        channel.data_entry_coarse(12);
        assert_eq!(channel.pitch_bend_range(), 256);

        channel.set_rpn_coarse(0);
        channel.set_rpn_fine(0);
        channel.data_entry_coarse(12);
        channel.data_entry_fine(64);
        assert_eq!(channel.pitch_bend_range(), (12 << 7) | 64);

        channel.set_nrpn_coarse(0);
        channel.set_nrpn_fine(0);
        channel.data_entry_coarse(2);
        assert_eq!(channel.pitch_bend_range(), (12 << 7) | 64);
    }

    #[test]
    fn reset_restores_defaults() {
        let mut channel = Channel::default();
        channel.set_pan_coarse(0);
        channel.set_pitch_bend(0);
        channel.set_hold(true);
        channel.set_retrigger_rate_coarse(127);
        channel.reset_all_controllers();
        assert_eq!(channel.pan(), 8192);
        assert_eq!(channel.pitch_bend(), 8192);
        assert!(!channel.hold());
        assert_eq!(channel.retrigger_rate(), retrigger_rate(8192));
    }

    #[test]
    fn program_change_reports_differences() {
        let mut channel = Channel::default();
        assert!(!channel.set_program(0));
        assert!(channel.set_program(5));
        assert!(!channel.set_program(5));
        channel.set_initial_program(130);
        channel.restore_program();
        assert_eq!(channel.program(), 130);
        assert_eq!(channel.bank(), 128);
    }
}
