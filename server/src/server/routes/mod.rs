// Route handler modules

pub mod research_routes;
