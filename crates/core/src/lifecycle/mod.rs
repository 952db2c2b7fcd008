pub mod machine;
pub mod states;

pub use machine::{BookingStateMachine, EffectResolution, Repricing};
pub use states::{
    default_note, LifecycleConfig, SideEffect, TransitionOptions, TransitionPlan, TransitionTable,
};
