//! 配置中心集成测试，测试用例位于 `tests/` 目录
