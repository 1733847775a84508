mod engine;
mod handler;
mod recorder;
