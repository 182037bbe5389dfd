//! Prologue/Epilogue Emitter (C5) and Call Materializer (C6).

pub mod call;
pub mod epilogue;
pub mod prologue;
