pub mod threaded_scenario_runner;
