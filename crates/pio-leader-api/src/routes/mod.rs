pub mod calibrations;
pub mod configs;
pub mod contrib;
pub mod experiments;
pub mod exports;
pub mod jobs;
pub mod logs;
pub mod system;
pub mod workers;
