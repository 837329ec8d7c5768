/// Domain layer: deployment entities and value objects, free of I/O.
pub mod entities;
pub mod value_objects;
