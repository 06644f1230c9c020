// THEORY:
// This file is the library entry point for `air_cursor`. It turns a stream of
// hand-landmark observations into pointer moves, clicks, drags and scrolls.
//
// The engine is layered:
// 1.  `core_modules` holds the parts: the observation wire format, the live
//     parameter store, the gesture classifier, the shared `HandData` snapshot
//     cell, the pointer controller and the detector adapters.
// 2.  `pipeline` is the synchronous facade: classifier and controller run in
//     lock step, one observation in, one snapshot out. Replays and tests use it.
// 3.  `session` runs the same parts concurrently: a producer task classifies
//     observations as they arrive and a consumer task drives the pointer from
//     the latest snapshot, with pause/resume and a safe shutdown.

pub mod core_modules;
pub mod pipeline;
pub mod session;
