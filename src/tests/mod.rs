//! End-to-end flows that wire the bus, clients, router and tracer
//! together the way an embedding application would.
